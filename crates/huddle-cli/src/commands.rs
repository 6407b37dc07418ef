//! Input line parsing for the terminal client.

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text for the current channel.
    Say(String),
    Join(String),
    Leave(String),
    Name(String),
    /// List active channels.
    Channels,
    Help,
    Quit,
    /// Blank line.
    Empty,
    /// A `/command` we don't know, or one missing its argument.
    Invalid(String),
}

pub const HELP: &str = "\
commands:
  /join <channel>    join a channel and make it current
  /leave <channel>   leave a channel
  /name <name>       change display name
  /channels          list joined channels
  /quit              disconnect and exit
anything else is sent to the current channel";

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        // "//text" sends a literal leading slash
        if let Some(text) = line.strip_prefix("//") {
            return Command::Say(format!("/{text}"));
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let with_arg = |make: fn(String) -> Command| {
            if arg.is_empty() {
                Command::Invalid(format!("/{name} needs an argument"))
            } else {
                make(arg.to_string())
            }
        };

        match name {
            "join" | "j" => with_arg(Command::Join),
            "leave" | "part" => with_arg(Command::Leave),
            "name" | "nick" => with_arg(Command::Name),
            "channels" => Command::Channels,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => Command::Invalid(format!("unknown command /{other}")),
        }
    }
}
