/// Chat commands accepted from the configured Telegram chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Positions,
    Trades,
    /// Forget the closed-trade history; balance and counters stay.
    Clear,
    Pause,
    Resume,
    Close(String),
    Unknown(String),
}

impl Command {
    /// Parse one message. Returns `None` for plain text that is not a command.
    pub fn parse(text: &str) -> Option<Command> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        let mut parts = text.split_whitespace();
        let head = parts.next()?;
        // "/status@my_bot" → "status"
        let name = head[1..].split('@').next().unwrap_or("").to_ascii_lowercase();

        let cmd = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "status" => Command::Status,
            "positions" => Command::Positions,
            "trades" => Command::Trades,
            "clear" => Command::Clear,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "close" => match parts.next() {
                Some(sym) => Command::Close(sym.to_ascii_uppercase()),
                None => Command::Unknown(text.to_string()),
            },
            _ => Command::Unknown(text.to_string()),
        };
        Some(cmd)
    }
}

pub const HELP_TEXT: &str = "<b>Commands</b>\n\
/status – balance, risk state and open positions\n\
/positions – open positions with unrealized PnL\n\
/trades – last closed trades\n\
/close SYMBOL – close a position at market\n\
/pause – stop opening new positions\n\
/resume – allow new positions again\n\
/clear – clear the closed-trade history\n\
/help – this message";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("/status"), Some(Command::Status));
        assert_eq!(Command::parse("  /HELP  "), Some(Command::Help));
        assert_eq!(Command::parse("/positions@paper_bot"), Some(Command::Positions));
        assert_eq!(Command::parse("/close ethusdt"), Some(Command::Close("ETHUSDT".into())));
    }

    #[test]
    fn close_without_symbol_is_unknown() {
        assert_eq!(Command::parse("/close"), Some(Command::Unknown("/close".into())));
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("/moon"), Some(Command::Unknown("/moon".into())));
    }
}
