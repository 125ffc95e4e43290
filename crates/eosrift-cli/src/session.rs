//! Session banner output
//!
//! The block printed once tunnels are up: status, forwarding lines, and
//! the inspector URL. Color only when stdout is a terminal.

use std::io::Write;

pub struct SessionOutput {
    pub version: String,
    pub status: String,
    pub forwardings: Vec<(String, String)>,
    pub inspector: String,
}

pub fn print_session<W: Write>(out: &mut W, session: &SessionOutput, color: bool) {
    let style = AnsiStyle { enabled: color };
    const LABEL_WIDTH: usize = 14;

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {}",
        style.brand("Eosrift"),
        style.dim(&session.version)
    );
    let _ = writeln!(out);

    let mut row = |label: &str, value: String| {
        let padded = format!("{:<width$}", label, width = LABEL_WIDTH);
        let _ = writeln!(out, "  {}  {}", style.dim(&padded), value);
    };

    row("Session Status", style.ok(&session.status));

    for (from, to) in &session.forwardings {
        row(
            "Forwarding",
            format!("{} {} {}", style.url(from), style.dim("→"), style.dim(to)),
        );
    }

    if !session.inspector.is_empty() {
        row("Inspector", style.url(&session.inspector));
    }

    let _ = writeln!(out);
}

struct AnsiStyle {
    enabled: bool,
}

impl AnsiStyle {
    fn wrap(&self, code: &str, text: &str) -> String {
        if !self.enabled || text.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn brand(&self, text: &str) -> String {
        self.wrap("35", text)
    }

    fn ok(&self, text: &str) -> String {
        self.wrap("32", text)
    }

    fn url(&self, text: &str) -> String {
        self.wrap("94", text)
    }

    fn dim(&self, text: &str) -> String {
        self.wrap("90", text)
    }
}

/// Friendlier display for loopback upstream addresses.
pub fn display_host_port(addr: &str) -> String {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return addr.to_string();
    };
    let host = match host {
        "127.0.0.1" | "[::1]" => "localhost",
        other => other,
    };
    format!("{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_output_has_no_ansi() {
        let session = SessionOutput {
            version: "dev".into(),
            status: "online".into(),
            forwardings: vec![(
                "https://demo.tunnel.eosrift.test".into(),
                "localhost:3000".into(),
            )],
            inspector: "http://127.0.0.1:4040".into(),
        };

        let mut buf = Vec::new();
        print_session(&mut buf, &session, false);
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("Session Status"));
        assert!(text.contains("https://demo.tunnel.eosrift.test"));
        assert!(text.contains("Inspector"));
        assert!(!text.contains("\x1b["));
    }

    #[test]
    fn test_colored_output_has_ansi() {
        let session = SessionOutput {
            version: "dev".into(),
            status: "online".into(),
            forwardings: vec![],
            inspector: String::new(),
        };

        let mut buf = Vec::new();
        print_session(&mut buf, &session, true);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\x1b[35m"));
        assert!(!text.contains("Inspector"));
    }

    #[test]
    fn test_display_host_port() {
        assert_eq!(display_host_port("127.0.0.1:3000"), "localhost:3000");
        assert_eq!(display_host_port("[::1]:3000"), "localhost:3000");
        assert_eq!(display_host_port("db.internal:5432"), "db.internal:5432");
        assert_eq!(display_host_port("nocolon"), "nocolon");
    }
}
