use bytes::{Buf, BufMut};

use crate::messaging::error::MessagingError;


macro_rules! checked_get_impl {
    ($checked_getter: ident, $ty:ty, $getter: ident) => {
        fn $checked_getter(&mut self, field: &'static str) -> Result<$ty, MessagingError> {
            if self.remaining() < size_of::<$ty>() {
                return Err(MessagingError::malformed(format!("buffer underflow reading '{}'", field)));
            }
            Ok(self.$getter())
        }
    }
}

/// Reading fixed-width fields with a length check, naming the field in the error. All numbers are
///  in network byte order.
pub trait BufExt: Buf {
    checked_get_impl!(checked_get_u8, u8, get_u8);
    checked_get_impl!(checked_get_u16, u16, get_u16);
    checked_get_impl!(checked_get_u32, u32, get_u32);

    /// reads a NUL padded string of exactly `width` bytes, stripping all trailing NUL bytes
    fn checked_get_fixed_str(&mut self, field: &'static str, width: usize) -> Result<String, MessagingError> {
        if self.remaining() < width {
            return Err(MessagingError::malformed(format!("buffer underflow reading '{}'", field)));
        }

        let mut raw = vec![0u8; width];
        self.copy_to_slice(&mut raw);

        let used = raw.iter()
            .rposition(|&b| b != 0)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        raw.truncate(used);

        String::from_utf8(raw)
            .map_err(|_| MessagingError::malformed(format!("field '{}' is not valid UTF-8", field)))
    }
}

impl <T: Buf> BufExt for T {
}

/// Checks up front that a string fits its fixed-width field, so that encoding can fail before
///  anything is written
pub fn check_fixed_str(field: &'static str, s: &str, width: usize) -> Result<(), MessagingError> {
    if s.len() > width {
        return Err(MessagingError::FieldTooLong {
            field,
            max: width,
            actual: s.len(),
        });
    }
    Ok(())
}

/// NB: the caller is responsible for calling [check_fixed_str] first
pub fn put_fixed_str(buf: &mut impl BufMut, s: &str, width: usize) {
    debug_assert!(s.len() <= width);
    let bytes = &s.as_bytes()[..s.len().min(width)];
    buf.put_slice(bytes);
    buf.put_bytes(0, width - bytes.len());
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::empty("", 4, b"\0\0\0\0")]
    #[case::partial("ab", 4, b"ab\0\0")]
    #[case::exact("abcd", 4, b"abcd")]
    #[case::multibyte("ä", 3, b"\xc3\xa4\0")]
    fn test_put_fixed_str(#[case] s: &str, #[case] width: usize, #[case] expected: &[u8]) {
        check_fixed_str("test", s, width).unwrap();

        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, s, width);
        assert_eq!(&buf, expected);
    }

    #[rstest]
    #[case::one_over("abcde", 4, 5)]
    #[case::multibyte("ää", 3, 4)]
    fn test_check_fixed_str_too_long(#[case] s: &str, #[case] width: usize, #[case] actual: usize) {
        assert_eq!(
            check_fixed_str("name", s, width),
            Err(MessagingError::FieldTooLong { field: "name", max: width, actual }),
        );
    }

    #[rstest]
    #[case::empty(b"\0\0\0\0", 4, Some(""), b"")]
    #[case::padded(b"ab\0\0xyz", 4, Some("ab"), b"xyz")]
    #[case::exact(b"abcd", 4, Some("abcd"), b"")]
    #[case::inner_nul(b"a\0b\0", 4, Some("a\0b"), b"")]
    #[case::too_short(b"abc", 4, None, b"abc")]
    #[case::invalid_utf8(b"\xff\xfe\0\0", 4, None, b"")]
    fn test_checked_get_fixed_str(#[case] mut buf: &[u8], #[case] width: usize, #[case] expected: Option<&str>, #[case] buf_after: &[u8]) {
        match buf.checked_get_fixed_str("test", width) {
            Ok(actual) => assert_eq!(Some(actual.as_str()), expected),
            Err(e) => {
                assert!(matches!(e, MessagingError::MalformedMessage(_)));
                assert!(expected.is_none());
            }
        }
        assert_eq!(buf, buf_after);
    }

    #[rstest]
    #[case::complete(b"\x01\x02\x03\x04", Some(0x01020304))]
    #[case::remainder(b"\0\0\0\x05\x06", Some(5))]
    #[case::short(b"\0\0\0", None)]
    fn test_checked_get_u32(#[case] mut buf: &[u8], #[case] expected: Option<u32>) {
        assert_eq!(buf.checked_get_u32("n").ok(), expected);
    }
}
