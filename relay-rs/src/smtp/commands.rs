use crate::error::{RelayError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    /// Mechanism and optional initial response
    Auth(String, Option<String>),
    /// Reverse path and ESMTP parameters
    MailFrom(String, Vec<String>),
    /// Forward path and ESMTP parameters
    RcptTo(String, Vec<String>),
    Data,
    Rset,
    Quit,
    Noop,
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(RelayError::SmtpProtocol("Empty command".to_string()));
        }

        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command.to_uppercase(), args.trim()),
            None => (line.to_uppercase(), ""),
        };

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(RelayError::SmtpProtocol("HELO requires domain".to_string()));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(RelayError::SmtpProtocol("EHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "AUTH" => {
                let mut parts = args.split_whitespace();
                let mechanism = parts
                    .next()
                    .ok_or_else(|| RelayError::SmtpProtocol("AUTH requires mechanism".to_string()))?;
                let initial = parts.next().map(|s| s.to_string());
                Ok(SmtpCommand::Auth(mechanism.to_uppercase(), initial))
            }
            "MAIL" => {
                let (from, params) = Self::parse_path(args, "FROM:")?;
                Ok(SmtpCommand::MailFrom(from, params))
            }
            "RCPT" => {
                let (to, params) = Self::parse_path(args, "TO:")?;
                if to.is_empty() {
                    return Err(RelayError::SmtpProtocol("Empty recipient".to_string()));
                }
                Ok(SmtpCommand::RcptTo(to, params))
            }
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }

    /// Parse `FROM:<addr> PARAM=VALUE ...` (or `TO:`)
    ///
    /// Angle brackets are optional and a space after the colon is tolerated.
    fn parse_path(args: &str, keyword: &str) -> Result<(String, Vec<String>)> {
        let matches_keyword = args
            .get(..keyword.len())
            .map(|prefix| prefix.eq_ignore_ascii_case(keyword))
            .unwrap_or(false);
        if !matches_keyword {
            return Err(RelayError::SmtpProtocol(format!(
                "Invalid syntax, expected {}<address>",
                keyword
            )));
        }

        let rest = args[keyword.len()..].trim_start();
        let (address, params) = if let Some(stripped) = rest.strip_prefix('<') {
            let end = stripped
                .find('>')
                .ok_or_else(|| RelayError::SmtpProtocol("Unterminated address".to_string()))?;
            (&stripped[..end], &stripped[end + 1..])
        } else {
            match rest.split_once(char::is_whitespace) {
                Some((address, params)) => (address, params),
                None => (rest, ""),
            }
        };

        let params = params.split_whitespace().map(|p| p.to_string()).collect();
        Ok((address.trim().to_string(), params))
    }
}
