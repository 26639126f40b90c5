use std::borrow::Cow;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static HASH_FUNC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        ^(.*)::h[a-f0-9]{16}$
    "#,
    )
    .unwrap()
});

static CRATE_HASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \b(\[[a-f0-9]{16}\])
    ",
    )
    .unwrap()
});

/// Removes the legacy `::h<hash>` suffix and `[<hash>]` crate disambiguators
/// from a demangled symbol name.
pub fn strip_symbol(s: &str) -> Cow<'_, str> {
    let stripped_trailing_hash = HASH_FUNC_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(s);

    CRATE_HASH_RE.replace_all(stripped_trailing_hash, "")
}

/// A `fmt::Write` sink over a fixed byte buffer.
///
/// Writes that do not fit are cut at the last UTF-8 character boundary that
/// still fits and the write fails, which stops the surrounding formatting.
pub struct BoundedWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BoundedWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        BoundedWriter { buf, pos: 0 }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }
}

impl fmt::Write for BoundedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.pos;
        if s.len() <= room {
            self.buf[self.pos..self.pos + s.len()].copy_from_slice(s.as_bytes());
            self.pos += s.len();
            return Ok(());
        }

        let mut cut = room;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf[self.pos..self.pos + cut].copy_from_slice(&s.as_bytes()[..cut]);
        self.pos += cut;
        Err(fmt::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    #[test]
    fn strip_legacy_hash() {
        assert_eq!(
            &strip_symbol("std::panic::catch_unwind::hd044952603e5f56c"),
            "std::panic::catch_unwind"
        );
        assert_eq!(&strip_symbol("main"), "main");
    }

    #[test]
    fn strip_crate_hash() {
        assert_eq!(
            &strip_symbol("std[550525b9dd91a68e]::rt::lang_start::<()>"),
            "std::rt::lang_start::<()>"
        );
        assert_eq!(
            &strip_symbol("<fn() as core[bb3d6b31f0e973c8]::ops::function::FnOnce<()>>::call_once"),
            "<fn() as core::ops::function::FnOnce<()>>::call_once"
        );
    }

    #[test]
    fn bounded_writer_fits() {
        let mut buf = [0u8; 8];
        let mut w = BoundedWriter::new(&mut buf);
        assert!(write!(w, "abc{}", 12).is_ok());
        assert_eq!(w.written(), 5);
        assert_eq!(&buf[..5], b"abc12");
    }

    #[test]
    fn bounded_writer_truncates_on_char_boundary() {
        let mut buf = [0u8; 4];
        let mut w = BoundedWriter::new(&mut buf);
        // "aé" is 3 bytes, the second 'é' would straddle the end
        assert!(w.write_str("aéé").is_err());
        assert_eq!(w.written(), 3);
        assert_eq!(std::str::from_utf8(&buf[..3]).unwrap(), "aé");
    }
}
