//! Command registry and token resolver
//!
//! Every command has a fixed numeric code that is part of the wire contract:
//! remote peers and automated clients address commands as bare integers, so
//! codes are never reassigned or removed, only appended. The discriminants
//! below reproduce the historical assignments; `test_historical_codes_frozen`
//! pins them.
//!
//! Token resolution accepts unambiguous abbreviations: a token resolves if it
//! is a case-insensitive prefix of exactly one command name. An exact
//! full-length match is exempt from the ambiguity check even when it is also
//! a prefix of a longer name — a long-standing quirk that clients depend on
//! (typing `Stop` must never be rejected because `StopSeries` exists).

use thiserror::Error;

/// Command codes. The odd capitalization of the names in [`COMMAND_TABLE`]
/// is historical and load-bearing: clients abbreviate against those exact
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CmdCode {
    CamCmd = 1,
    CamSetup = 2,
    CamWait = 3,
    DataPath = 4,
    Df = 5,
    ExpEnd = 6,
    Exposure = 7,
    ExpTime = 8,
    HeaderString = 9,
    ImgPath = 10,
    LdCmndFile = 11,
    ReadSetup = 12,
    K = 13,
    ResetCam = 14,
    Send = 15,
    ShowPid = 16,
    ShutterEnable = 17,
    Telemetry = 18,
    Exit = 19,
    Quit = 20,
    Menu = 21,
    Status = 22,
    CamStatus = 23,
    // Extended detector block; the gap below 216 is reserved by older
    // deployments and must stay unassigned.
    ImgOnly = 216,
    Cpix = 217,
    CpixX = 218,
    Stop = 219,
    Trim = 223,
    NImages = 233,
    ExpPeriod = 234,
    ExtEnable = 235,
}

impl CmdCode {
    /// Numeric wire code
    pub fn wire(self) -> u16 {
        self as u16
    }
}

/// The canonical `(name, code)` table, in registration order.
pub const COMMAND_TABLE: &[(&str, CmdCode)] = &[
    ("CamCmd", CmdCode::CamCmd),
    ("CamSetup", CmdCode::CamSetup),
    ("CamWait", CmdCode::CamWait),
    ("DataPath", CmdCode::DataPath),
    ("Df", CmdCode::Df),
    ("ExpEnd", CmdCode::ExpEnd),
    ("Exposure", CmdCode::Exposure),
    ("ExpTime", CmdCode::ExpTime),
    ("HeaderString", CmdCode::HeaderString),
    ("ImgPath", CmdCode::ImgPath),
    ("LdCmndFile", CmdCode::LdCmndFile),
    ("Read_setup", CmdCode::ReadSetup),
    ("K", CmdCode::K),
    ("ResetCam", CmdCode::ResetCam),
    ("Send", CmdCode::Send),
    ("ShowPID", CmdCode::ShowPid),
    ("ShutterEnable", CmdCode::ShutterEnable),
    ("TelemetrY", CmdCode::Telemetry),
    ("ExiT", CmdCode::Exit),
    ("QuiT", CmdCode::Quit),
    ("MenU", CmdCode::Menu),
    ("Status", CmdCode::Status),
    ("CamStatus", CmdCode::CamStatus),
    ("ImgonlY", CmdCode::ImgOnly),
    ("Cpix", CmdCode::Cpix),
    ("Cpix_x", CmdCode::CpixX),
    ("Stop", CmdCode::Stop),
    ("Trim", CmdCode::Trim),
    ("NImages", CmdCode::NImages),
    ("ExpPeriod", CmdCode::ExpPeriod),
    ("ExtEnable", CmdCode::ExtEnable),
];

/// A resolved command, immutable once dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: CmdCode,
    pub argument: String,
    /// Whether the caller expects response frames (false for the operator
    /// console and batch command files)
    pub wants_response: bool,
}

/// Token resolution failures. Both are reported on the wire as ERR frames
/// tagged with the generic command-echo code ([`CmdCode::CamCmd`]), not a
/// typed code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("*** Unrecognized command: {0}")]
    NotFound(String),
    #[error("*** Ambiguous command: {0}")]
    Ambiguous(String),
}

/// Ordered command registry built at startup
#[derive(Debug)]
pub struct CommandRegistry {
    entries: Vec<(&'static str, CmdCode)>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry {
            entries: COMMAND_TABLE.to_vec(),
        }
    }

    /// Look up a command by its frozen numeric code
    pub fn by_code(&self, code: u16) -> Option<CmdCode> {
        self.entries
            .iter()
            .find(|(_, c)| c.wire() == code)
            .map(|(_, c)| *c)
    }

    /// Canonical name for a code
    pub fn name_of(&self, code: CmdCode) -> &'static str {
        self.entries
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }

    /// All command names, for the menu display
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(n, _)| *n).collect()
    }

    /// Resolve a trimmed token to a command code.
    ///
    /// An all-digit token resolves directly by numeric code, bypassing name
    /// lookup; this is how peer processes address commands. Otherwise the
    /// token must be a case-insensitive prefix of exactly one name, with
    /// exact full-length matches exempt from the ambiguity check.
    pub fn resolve(&self, token: &str) -> Result<CmdCode, ResolveError> {
        if token.is_empty() {
            return Err(ResolveError::NotFound(token.to_string()));
        }

        if token.bytes().all(|b| b.is_ascii_digit()) {
            let code: u16 = token
                .parse()
                .map_err(|_| ResolveError::NotFound(token.to_string()))?;
            return self
                .by_code(code)
                .ok_or_else(|| ResolveError::NotFound(token.to_string()));
        }

        let mut matched: Option<CmdCode> = None;
        let mut count = 0;
        for (name, code) in &self.entries {
            if name.len() >= token.len() && name[..token.len()].eq_ignore_ascii_case(token) {
                matched = Some(*code);
                count += 1;
                if name.len() == token.len() {
                    // exact match is exempt from the ambiguity check
                    count = 1;
                    break;
                }
            }
        }

        match (matched, count) {
            (Some(code), 1) => Ok(code),
            (None, _) => Err(ResolveError::NotFound(token.to_string())),
            (Some(_), _) => Err(ResolveError::Ambiguous(token.to_string())),
        }
    }
}

/// Split a command line into its leading token and raw argument text.
///
/// The token is the initial run of alphanumeric/underscore characters; the
/// argument starts after any whitespace or a single `=`.
pub fn split_line(line: &str) -> (&str, &str) {
    let line = line.trim();
    let end = line
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    let (token, rest) = line.split_at(end);
    let argument = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '=');
    (token, argument)
}

/// Clean up an argument string: strip unescaped double quotes (escaped ones
/// are preserved without their backslash), trim, and collapse runs of blanks.
pub fn clean_argument(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut chars = arg.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'"') => {
                chars.next();
                out.push('"');
            }
            '"' => {} // unescaped quote: drop it
            _ => out.push(c),
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    let mut prev_blank = false;
    for c in out.trim().chars() {
        let blank = c == ' ';
        if !(blank && prev_blank) {
            collapsed.push(c);
        }
        prev_blank = blank;
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_historical_codes_frozen() {
        // Contract-frozen wire codes: remote peers hard-code these integers.
        let reg = CommandRegistry::new();
        let expected = [
            (1, "CamCmd"),
            (2, "CamSetup"),
            (3, "CamWait"),
            (4, "DataPath"),
            (5, "Df"),
            (6, "ExpEnd"),
            (7, "Exposure"),
            (8, "ExpTime"),
            (9, "HeaderString"),
            (10, "ImgPath"),
            (11, "LdCmndFile"),
            (12, "Read_setup"),
            (13, "K"),
            (14, "ResetCam"),
            (15, "Send"),
            (16, "ShowPID"),
            (17, "ShutterEnable"),
            (18, "TelemetrY"),
            (19, "ExiT"),
            (20, "QuiT"),
            (21, "MenU"),
            (22, "Status"),
            (23, "CamStatus"),
            (216, "ImgonlY"),
            (217, "Cpix"),
            (218, "Cpix_x"),
            (219, "Stop"),
            (223, "Trim"),
            (233, "NImages"),
            (234, "ExpPeriod"),
            (235, "ExtEnable"),
        ];
        for (code, name) in expected {
            let cmd = reg.by_code(code).unwrap_or_else(|| {
                panic!("code {} ({}) must stay bound", code, name);
            });
            assert_eq!(reg.name_of(cmd), name, "code {} renamed", code);
        }
    }

    #[test]
    fn test_no_duplicate_names_or_codes() {
        let reg = CommandRegistry::new();
        let names = reg.names();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert!(!a.eq_ignore_ascii_case(b), "duplicate name {}", a);
            }
        }
        let mut codes: Vec<u16> = COMMAND_TABLE.iter().map(|(_, c)| c.wire()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), COMMAND_TABLE.len());
    }

    #[test]
    fn test_resolve_exact() {
        let reg = CommandRegistry::new();
        assert_eq!(reg.resolve("Exposure"), Ok(CmdCode::Exposure));
        assert_eq!(reg.resolve("exposure"), Ok(CmdCode::Exposure));
        assert_eq!(reg.resolve("EXPOSURE"), Ok(CmdCode::Exposure));
    }

    #[test]
    fn test_resolve_abbreviation() {
        let reg = CommandRegistry::new();
        assert_eq!(reg.resolve("tel"), Ok(CmdCode::Telemetry));
        assert_eq!(reg.resolve("menu"), Ok(CmdCode::Menu));
        assert_eq!(reg.resolve("quit"), Ok(CmdCode::Quit));
    }

    #[test]
    fn test_resolve_ambiguous() {
        let reg = CommandRegistry::new();
        // "Ex" prefixes ExpEnd, Exposure, ExpTime, ExiT, ExtEnable
        assert_eq!(
            reg.resolve("Ex"),
            Err(ResolveError::Ambiguous("Ex".to_string()))
        );
        // "Cam" prefixes CamCmd, CamSetup, CamWait, CamStatus
        assert!(matches!(reg.resolve("Cam"), Err(ResolveError::Ambiguous(_))));
    }

    #[test]
    fn test_resolve_exact_match_exempt_from_ambiguity() {
        let reg = CommandRegistry::new();
        // "Status" is a full name and also a prefix-sibling of CamStatus's
        // tail; more importantly "Cpix" is a full name and a strict prefix
        // of "Cpix_x". Exactness wins.
        assert_eq!(reg.resolve("Cpix"), Ok(CmdCode::Cpix));
        assert_eq!(reg.resolve("cpix"), Ok(CmdCode::Cpix));
        assert_eq!(reg.resolve("Exp"), Err(ResolveError::Ambiguous("Exp".into())));
    }

    #[test]
    fn test_resolve_not_found() {
        let reg = CommandRegistry::new();
        assert_eq!(
            reg.resolve("frobnicate"),
            Err(ResolveError::NotFound("frobnicate".to_string()))
        );
    }

    #[test]
    fn test_resolve_numeric() {
        let reg = CommandRegistry::new();
        assert_eq!(reg.resolve("7"), Ok(CmdCode::Exposure));
        assert_eq!(reg.resolve("13"), Ok(CmdCode::K));
        assert_eq!(reg.resolve("235"), Ok(CmdCode::ExtEnable));
        assert!(matches!(reg.resolve("999"), Err(ResolveError::NotFound(_))));
    }

    #[test]
    fn test_split_line() {
        assert_eq!(split_line("ExpTime 2.5"), ("ExpTime", "2.5"));
        assert_eq!(split_line("  ExpTime = 2.5"), ("ExpTime", "2.5"));
        assert_eq!(split_line("menu"), ("menu", ""));
        assert_eq!(split_line("7 /tmp/a.img"), ("7", "/tmp/a.img"));
        assert_eq!(split_line("Read_setup foo"), ("Read_setup", "foo"));
    }

    #[test]
    fn test_split_line_illegal_leading_char() {
        let (token, _) = split_line("?what");
        assert!(token.is_empty());
    }

    #[test]
    fn test_clean_argument_quotes() {
        assert_eq!(clean_argument("\"hello world\""), "hello world");
        assert_eq!(clean_argument("say \\\"hi\\\""), "say \"hi\"");
    }

    #[test]
    fn test_clean_argument_collapses_blanks() {
        assert_eq!(clean_argument("a   b  c"), "a b c");
        assert_eq!(clean_argument("  trimmed  "), "trimmed");
    }
}
