// Named-key -> escape sequence lookup for `sendKey`. No teacher analog
// (the teacher only ever forwards raw client tty bytes); table values
// are the standard xterm/VT100 sequences.

use crate::error::CoreError;

pub fn key_to_bytes(key: &str) -> Result<Vec<u8>, CoreError> {
    let bytes: &[u8] = match key {
        "Enter" => b"\r",
        "Tab" => b"\t",
        "Escape" => b"\x1b",
        "Backspace" => b"\x7f",
        "Delete" => b"\x1b[3~",
        "ArrowUp" => b"\x1b[A",
        "ArrowDown" => b"\x1b[B",
        "ArrowRight" => b"\x1b[C",
        "ArrowLeft" => b"\x1b[D",
        "Home" => b"\x1b[H",
        "End" => b"\x1b[F",
        "PageUp" => b"\x1b[5~",
        "PageDown" => b"\x1b[6~",
        "F1" => b"\x1bOP",
        "F2" => b"\x1bOQ",
        "F3" => b"\x1bOR",
        "F4" => b"\x1bOS",
        "F5" => b"\x1b[15~",
        "F6" => b"\x1b[17~",
        "F7" => b"\x1b[18~",
        "F8" => b"\x1b[19~",
        "F9" => b"\x1b[20~",
        "F10" => b"\x1b[21~",
        "F11" => b"\x1b[23~",
        "F12" => b"\x1b[24~",
        other => return ctrl_chord(other),
    };
    Ok(bytes.to_vec())
}

fn ctrl_chord(key: &str) -> Result<Vec<u8>, CoreError> {
    let Some(letter) = key.strip_prefix("Ctrl+") else {
        return Err(CoreError::UnknownKey(key.to_string()));
    };
    let mut chars = letter.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return Err(CoreError::UnknownKey(key.to_string()));
    };
    if !c.is_ascii_alphabetic() {
        return Err(CoreError::UnknownKey(key.to_string()));
    }
    let upper = c.to_ascii_uppercase() as u8;
    // Ctrl+<letter> maps to the 1-26 control code range.
    Ok(vec![upper - b'A' + 1])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn named_keys_resolve() {
        assert_eq!(key_to_bytes("Enter").unwrap(), b"\r".to_vec());
        assert_eq!(key_to_bytes("ArrowUp").unwrap(), b"\x1b[A".to_vec());
        assert_eq!(key_to_bytes("F12").unwrap(), b"\x1b[24~".to_vec());
    }

    #[test]
    fn ctrl_chord_resolves() {
        assert_eq!(key_to_bytes("Ctrl+C").unwrap(), vec![0x03]);
        assert_eq!(key_to_bytes("Ctrl+a").unwrap(), vec![0x01]);
    }

    #[test]
    fn unknown_key_errors() {
        assert!(matches!(key_to_bytes("Banana"), Err(CoreError::UnknownKey(_))));
        assert!(matches!(key_to_bytes("Ctrl+1"), Err(CoreError::UnknownKey(_))));
    }
}
