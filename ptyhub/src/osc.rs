// Extracts OSC 0/1/2 window-title sequences from raw PTY output and
// classifies them as useful or shell-prompt-like.

use regex::Regex;
use std::sync::OnceLock;

/// Scans a byte stream for `ESC ] (0|1|2) ; <text> (BEL | ESC \)` sequences.
/// Feed it chunks as they arrive from the PTY; each call returns the
/// outcome for that chunk, since the spec defines "last match wins" at
/// chunk granularity, not byte granularity.
#[derive(Debug, Default)]
pub struct OscTitleParser {
    state: ScanState,
    payload: Vec<u8>,
    osc_kind: Option<u8>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    #[default]
    Ground,
    SawEsc,
    InOsc,
    OscEscPending,
}

/// Outcome of feeding one chunk of output through the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleOutcome {
    /// No OSC 0/2 title sequence was found in this chunk.
    NoChange,
    /// A useful title was found.
    Useful(String),
    /// A title was found but classified as shell-prompt-like; callers
    /// should treat this as an explicit clear.
    Cleared,
}

impl OscTitleParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw PTY bytes. Returns the *last* OSC 0/2 title
    /// observed in this chunk, classified as useful or not, or `NoChange`
    /// if no OSC 0/2 sequence terminated within the chunk.
    pub fn feed(&mut self, bytes: &[u8]) -> TitleOutcome {
        let mut last_title: Option<String> = None;

        for &b in bytes {
            match self.state {
                ScanState::Ground => {
                    if b == 0x1b {
                        self.state = ScanState::SawEsc;
                    }
                }
                ScanState::SawEsc => {
                    if b == b']' {
                        self.state = ScanState::InOsc;
                        self.payload.clear();
                        self.osc_kind = None;
                    } else {
                        self.state = ScanState::Ground;
                    }
                }
                ScanState::InOsc => {
                    if self.osc_kind.is_none() {
                        // collecting the leading "<digits>;" kind prefix
                        if b == b';' {
                            self.osc_kind = Some(
                                std::str::from_utf8(&self.payload)
                                    .ok()
                                    .and_then(|s| s.parse::<u8>().ok())
                                    .unwrap_or(u8::MAX),
                            );
                            self.payload.clear();
                        } else {
                            self.payload.push(b);
                        }
                        continue;
                    }
                    match b {
                        0x07 => {
                            last_title = self.finish_sequence();
                        }
                        0x1b => {
                            self.state = ScanState::OscEscPending;
                        }
                        _ => self.payload.push(b),
                    }
                }
                ScanState::OscEscPending => {
                    if b == b'\\' {
                        last_title = self.finish_sequence();
                    } else {
                        // not a valid ST; keep collecting, treat the ESC
                        // byte itself as payload to stay permissive.
                        self.payload.push(0x1b);
                        self.payload.push(b);
                        self.state = ScanState::InOsc;
                    }
                }
            }
        }

        match last_title {
            Some(title) => {
                if is_useful_title(&title) {
                    TitleOutcome::Useful(title)
                } else {
                    TitleOutcome::Cleared
                }
            }
            None => TitleOutcome::NoChange,
        }
    }

    fn finish_sequence(&mut self) -> Option<String> {
        self.state = ScanState::Ground;
        let kind = self.osc_kind.take();
        let text = String::from_utf8_lossy(&self.payload).into_owned();
        self.payload.clear();
        match kind {
            Some(0) | Some(2) => Some(text),
            // OSC 1 sets the icon name only; ignored per spec.
            _ => None,
        }
    }
}

fn user_host_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w-]+@[\w.-]+:\s*").unwrap())
}

/// `dirname — shell` style themes: a path-like left side followed by an
/// em/en-dash-ish separator.
fn dir_dash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:/|~|\.\.?)[^\n]*\s[—–-]\s").unwrap())
}

pub fn is_useful_title(title: &str) -> bool {
    if user_host_re().is_match(title) {
        return false;
    }
    if title.starts_with('/') || title.starts_with('~') {
        return false;
    }
    if dir_dash_re().is_match(title) {
        return false;
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn useful_title_passes_through() {
        let mut p = OscTitleParser::new();
        let out = p.feed(b"\x1b]2;vim main.rs\x07");
        assert_eq!(out, TitleOutcome::Useful("vim main.rs".to_string()));
    }

    #[test]
    fn user_host_title_is_cleared() {
        let mut p = OscTitleParser::new();
        let out = p.feed(b"\x1b]2;user@host:~/p\x07");
        assert_eq!(out, TitleOutcome::Cleared);
    }

    #[test]
    fn bare_path_title_is_cleared() {
        let mut p = OscTitleParser::new();
        let out = p.feed(b"\x1b]2;~/projects\x07");
        assert_eq!(out, TitleOutcome::Cleared);
    }

    #[test]
    fn dir_dash_shell_theme_is_cleared() {
        let mut p = OscTitleParser::new();
        let out = p.feed("\x1b]0;~/code \u{2014} zsh\x07".as_bytes());
        assert_eq!(out, TitleOutcome::Cleared);
    }

    #[test]
    fn icon_only_osc_1_is_ignored() {
        let mut p = OscTitleParser::new();
        let out = p.feed(b"\x1b]1;icon-name\x07");
        assert_eq!(out, TitleOutcome::NoChange);
    }

    #[test]
    fn last_match_in_chunk_wins() {
        let mut p = OscTitleParser::new();
        let out = p.feed(b"\x1b]2;first\x07junk\x1b]2;second\x07");
        assert_eq!(out, TitleOutcome::Useful("second".to_string()));
    }

    #[test]
    fn st_terminator_form_is_supported() {
        let mut p = OscTitleParser::new();
        let out = p.feed(b"\x1b]2;alt-form\x1b\\");
        assert_eq!(out, TitleOutcome::Useful("alt-form".to_string()));
    }

    #[test]
    fn scenario_b_title_classification_order() {
        let mut p = OscTitleParser::new();
        assert_eq!(p.feed(b"\x1b]2;~/projects\x07"), TitleOutcome::Cleared);
        assert_eq!(
            p.feed(b"\x1b]2;vim main.rs\x07"),
            TitleOutcome::Useful("vim main.rs".to_string())
        );
    }
}
