//! Normalization passes applied to renderer output before comparison.
//!
//! Each pass is a pure function returning `Cow::Borrowed` when it leaves the
//! data untouched, so the file helper only rewrites artifacts that changed.

use std::borrow::Cow;
use std::path::Path;

use ms_core::{HarnessError, HarnessResult, PostProcess};
use tracing::debug;

const VERSION_BANNERS: [&[u8]; 2] = [b"<!-- MapServer version", b"<!--MapServer version"];
const COMMENT_END: &[u8] = b"-->";
const MIN_DECIMALS: usize = 6;
const MAX_DECIMALS: usize = 24;

/// A single in-place rewrite of an artifact.
pub type Pass = for<'a> fn(&'a [u8]) -> Cow<'a, [u8]>;

/// Drop HTTP headers: everything up to and including the first blank line.
#[must_use]
pub fn demime(data: &[u8]) -> Cow<'_, [u8]> {
    match find(data, b"\n\n", 0) {
        Some(pos) => Cow::Owned(data[pos + 2..].to_vec()),
        None => Cow::Borrowed(data),
    }
}

/// Remove the `<!-- MapServer version ... -->` comment together with the
/// byte preceding it and the byte following it (normally line breaks).
///
/// The terminator scan stops five bytes short of the end, so a comment
/// closed in the last four bytes of the data is left in place.
#[must_use]
pub fn deversion(data: &[u8]) -> Cow<'_, [u8]> {
    let Some(start) = VERSION_BANNERS
        .iter()
        .find_map(|banner| find(data, banner, 0))
    else {
        return Cow::Borrowed(data);
    };

    let limit = data.len().saturating_sub(5);
    let mut end = start + 10;
    while end < limit && !data[end..].starts_with(COMMENT_END) {
        end += 1;
    }
    if data.get(end..end + COMMENT_END.len()) != Some(COMMENT_END) {
        return Cow::Borrowed(data);
    }

    let head = &data[..start.saturating_sub(1)];
    let tail = data.get(end + COMMENT_END.len() + 1..).unwrap_or_default();
    let mut out = Vec::with_capacity(head.len() + tail.len());
    out.extend_from_slice(head);
    out.extend_from_slice(tail);
    Cow::Owned(out)
}

/// Rewrite three-digit exponents as emitted by some C runtimes
/// (`1.5e+007"`) to the two-digit form (`1.5e+07"`).
#[must_use]
pub fn fix_exponent(data: &[u8]) -> Cow<'_, [u8]> {
    let is_three_digit = |i: usize| {
        data[i..].starts_with(b"e+0")
            && data.get(i + 3).is_some_and(u8::is_ascii_digit)
            && data.get(i + 4).is_some_and(u8::is_ascii_digit)
            && data.get(i + 5) == Some(&b'"')
    };

    if !(0..data.len()).any(is_three_digit) {
        return Cow::Borrowed(data);
    }

    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if is_three_digit(i) {
            out.extend_from_slice(b"e+");
            i += 3;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    Cow::Owned(out)
}

/// Drop the last digit of every number with six to twenty-four decimals
/// (longer fractions lose the 24th decimal and keep their tail).
#[must_use]
pub fn truncate_one_decimal(data: &[u8]) -> Cow<'_, [u8]> {
    let mut out: Option<Vec<u8>> = None;
    let mut copied = 0;
    let mut i = 0;

    while i < data.len() {
        let Some(end) = long_decimal_at(data, i) else {
            i += 1;
            continue;
        };
        let buf = out.get_or_insert_with(|| Vec::with_capacity(data.len()));
        buf.extend_from_slice(&data[copied..end - 1]);
        copied = end;
        i = end;
    }

    match out {
        Some(mut buf) => {
            buf.extend_from_slice(&data[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(data),
    }
}

/// End offset of a `[0-9]+\.[0-9]{6,24}` match starting at `start`.
fn long_decimal_at(data: &[u8], start: usize) -> Option<usize> {
    let int_len = digit_run(data, start);
    if int_len == 0 || data.get(start + int_len) != Some(&b'.') {
        return None;
    }
    let frac_start = start + int_len + 1;
    let frac_len = digit_run(data, frac_start);
    (frac_len >= MIN_DECIMALS).then(|| frac_start + frac_len.min(MAX_DECIMALS))
}

fn digit_run(data: &[u8], start: usize) -> usize {
    data.get(start..)
        .map_or(0, |rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
}

/// Convert CR+LF line endings to LF. Data containing a NUL byte is binary
/// and left alone.
#[must_use]
pub fn crlf(data: &[u8]) -> Cow<'_, [u8]> {
    if data.contains(&0) || find(data, b"\r\n", 0).is_none() {
        return Cow::Borrowed(data);
    }
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\r' && data.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        out.push(data[i]);
        i += 1;
    }
    Cow::Owned(out)
}

/// Apply `passes` in order to the file at `path`, rewriting it only when its
/// content changed. A missing file is not an error; `Ok(false)` is returned.
pub fn rewrite_in_place(path: &Path, passes: &[Pass]) -> HarnessResult<bool> {
    let original = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(source) => return Err(HarnessError::io(path, source)),
    };

    let mut current = original.clone();
    for pass in passes {
        let next = match pass(&current) {
            Cow::Owned(next) => next,
            Cow::Borrowed(_) => continue,
        };
        current = next;
    }

    if current == original {
        return Ok(false);
    }
    std::fs::write(path, &current).map_err(|source| HarnessError::io(path, source))?;
    debug!(
        "normalized {} ({} -> {} bytes)",
        path.display(),
        original.len(),
        current.len()
    );
    Ok(true)
}

/// Passes implied by the result token of a command template. Line endings
/// are always normalized last.
#[must_use]
pub fn passes_for(post: PostProcess) -> Vec<Pass> {
    let mut passes: Vec<Pass> = Vec::new();
    if post.demime {
        passes.push(demime);
    }
    if post.deversion {
        passes.push(deversion);
        passes.push(fix_exponent);
        passes.push(truncate_one_decimal);
    }
    passes.push(crlf);
    passes
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::{
        crlf, demime, deversion, fix_exponent, passes_for, rewrite_in_place,
        truncate_one_decimal,
    };
    use ms_core::PostProcess;
    use proptest::prelude::*;
    use std::borrow::Cow;

    #[test]
    fn demime_strips_headers() {
        let data = b"Content-type: image/png\n\n\x89PNG\n\nrest";
        assert_eq!(&*demime(data), b"\x89PNG\n\nrest");
    }

    #[test]
    fn demime_without_blank_line_is_untouched() {
        let data = b"no headers here\n";
        assert!(matches!(demime(data), Cow::Borrowed(_)));
    }

    #[test]
    fn deversion_removes_banner_and_surrounding_newlines() {
        let data = b"<?xml version='1.0'?>\n<!-- MapServer version 5.0.0 OUTPUT=PNG -->\n<WMT_MS_Capabilities/>\n";
        assert_eq!(
            &*deversion(data),
            b"<?xml version='1.0'?><WMT_MS_Capabilities/>\n".as_slice()
        );
    }

    #[test]
    fn deversion_accepts_compact_banner() {
        let data = b"a\n<!--MapServer version 4.10 -->\nb";
        assert_eq!(&*deversion(data), b"ab".as_slice());
    }

    #[test]
    fn deversion_at_start_of_file() {
        let data = b"<!-- MapServer version 5 -->\nbody";
        assert_eq!(&*deversion(data), b"body".as_slice());
    }

    #[test]
    fn deversion_keeps_comment_closed_at_end_of_data() {
        let data = b"<a>\n<!-- MapServer version 5 -->\n";
        assert!(matches!(deversion(data), Cow::Borrowed(_)));
        assert_eq!(&*deversion(data), data.as_slice());
    }

    #[test]
    fn deversion_scan_stops_five_bytes_before_end() {
        // Terminator four bytes from the end: out of reach.
        let data = b"<!--MapServer version-->x";
        assert!(matches!(deversion(data), Cow::Borrowed(_)));

        // Terminator exactly five bytes from the end: still found.
        let data = b"<!--MapServer version-->ab";
        assert_eq!(&*deversion(data), b"b".as_slice());
    }

    #[test]
    fn deversion_leaves_unterminated_comment() {
        let data = b"x\n<!-- MapServer version 5.0 never closed";
        assert!(matches!(deversion(data), Cow::Borrowed(_)));
    }

    #[test]
    fn fix_exponent_only_rewrites_quoted_three_digit_exponents() {
        let data = br#"<x v="1.5e+007"/> <y v="2e+007 "/> <z v="3e+0123"/>"#;
        assert_eq!(
            &*fix_exponent(data),
            br#"<x v="1.5e+07"/> <y v="2e+007 "/> <z v="3e+0123"/>"#.as_slice()
        );
    }

    #[test]
    fn fix_exponent_at_end_of_data() {
        let data = b"1e+0";
        assert!(matches!(fix_exponent(data), Cow::Borrowed(_)));
    }

    #[test]
    fn truncates_long_decimals() {
        let data = b"x=12.1234567 y=3.12345 z=-0.000001";
        assert_eq!(
            &*truncate_one_decimal(data),
            b"x=12.123456 y=3.12345 z=-0.00000".as_slice()
        );
    }

    #[test]
    fn truncation_caps_at_twenty_four_decimals() {
        let data = b"1.123456789012345678901234567";
        assert_eq!(
            &*truncate_one_decimal(data),
            b"1.12345678901234567890123567".as_slice()
        );
    }

    #[test]
    fn truncation_without_long_decimals_is_untouched() {
        let data = b"1.5 2.25 version 5.0.0";
        assert!(matches!(truncate_one_decimal(data), Cow::Borrowed(_)));
    }

    #[test]
    fn crlf_converts_text() {
        assert_eq!(&*crlf(b"a\r\nb\r\n\rc"), b"a\nb\n\rc".as_slice());
    }

    #[test]
    fn crlf_skips_binary() {
        let data = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert!(matches!(crlf(data), Cow::Borrowed(_)));
    }

    #[test]
    fn passes_follow_template_tokens() {
        assert_eq!(passes_for(PostProcess::default()).len(), 1);
        assert_eq!(
            passes_for(PostProcess {
                demime: true,
                deversion: true
            })
            .len(),
            5
        );
    }

    #[test]
    fn rewrite_in_place_applies_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("caps.xml");
        std::fs::write(
            &path,
            "Content-type: text/xml\r\n\n<a>\r\n<!-- MapServer version 5 -->\r\n<b x=\"1e+005\" y=\"0.1234567\"/>\r\n</a>\r\n",
        )
        .expect("write");

        let post = PostProcess {
            demime: true,
            deversion: true,
        };
        assert!(rewrite_in_place(&path, &passes_for(post)).expect("rewrite"));
        let text = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(text, "<a>\n<b x=\"1e+05\" y=\"0.123456\"/>\n</a>\n");

        let plain = passes_for(PostProcess::default());
        assert!(!rewrite_in_place(&path, &plain).expect("second rewrite"));
    }

    #[test]
    fn rewrite_in_place_ignores_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.png");
        assert!(!rewrite_in_place(&missing, &passes_for(PostProcess::default())).expect("rewrite"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_crlf_leaves_binary_alone(mut data in proptest::collection::vec(any::<u8>(), 0..256)) {
            data.push(0);
            let converted = crlf(&data);
            prop_assert_eq!(converted.as_ref(), data.as_slice());
        }

        #[test]
        fn prop_passes_never_grow_data(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert!(demime(&data).len() <= data.len());
            prop_assert!(deversion(&data).len() <= data.len());
            prop_assert!(fix_exponent(&data).len() <= data.len());
            prop_assert!(truncate_one_decimal(&data).len() <= data.len());
        }
    }
}
