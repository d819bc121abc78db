#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Session,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "session" => CliVerb::Session,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  session [--config PATH] [--memory]   Run an editor session against the file service"
            .to_string(),
        "  help                                 Show this help".to_string(),
    ]
}

pub fn session_help_lines() -> Vec<String> {
    vec![
        "  open PATH                 Open a file in a tab".to_string(),
        "  click N                   Activate tab N, refreshing it in the background".to_string(),
        "  edit N TEXT               Replace the content of tab N (\\n for newlines)".to_string(),
        "  save N                    Save tab N".to_string(),
        "  close N                   Close tab N".to_string(),
        "  close-others N            Close every tab except N".to_string(),
        "  close-all                 Close every tab".to_string(),
        "  move FROM TO              Move a tab".to_string(),
        "  resolve N server|local|save-as PATH".to_string(),
        "                            Resolve a conflict on tab N".to_string(),
        "  ls [FOLDER]               List a folder into the file tree".to_string(),
        "  new PATH                  Create an empty file and open it".to_string(),
        "  rename OLD NEW            Rename a file or folder".to_string(),
        "  delete PATH               Delete a file or folder".to_string(),
        "  upload PATH TEXT          Upload a text file".to_string(),
        "  tabs                      List open tabs".to_string(),
        "  pump                      Apply responses that have arrived".to_string(),
        "  settle                    Wait for every pending request".to_string(),
        "  help                      Show session commands".to_string(),
        "  exit                      Finish pending work and leave".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    let mut lines = cli_help_lines();
    lines.push(String::new());
    lines.push("Session commands:".to_string());
    lines.extend(session_help_lines());
    lines.join("\n")
}
