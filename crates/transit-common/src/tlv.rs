//! BER-TLV lookup for selection responses (FCI templates)

/// Split the next TLV element off the front of `data`.
///
/// Returns `(tag, value, rest)`. Single-byte and two-byte tags are supported,
/// as is the long length form (`81 xx`, `82 xx xx`).
fn next_element(data: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    let first = *data.first()?;
    let tag_len = if first & 0x1F == 0x1F { 2 } else { 1 };
    if data.len() < tag_len + 1 {
        return None;
    }
    let (tag, rest) = data.split_at(tag_len);

    let (len, rest) = match rest[0] {
        short if short & 0x80 == 0 => (short as usize, &rest[1..]),
        long => {
            let count = (long & 0x7F) as usize;
            if count == 0 || count > 3 || rest.len() < 1 + count {
                return None;
            }
            let len = rest[1..=count]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | b as usize);
            (len, &rest[1 + count..])
        }
    };

    if rest.len() < len {
        return None;
    }
    let (value, rest) = rest.split_at(len);
    Some((tag, value, rest))
}

/// Search the top level of `data` for `tag` and return its value.
///
/// Returns `None` when the tag is absent or the encoding is truncated
/// before the tag is reached.
pub fn find_tag<'a>(data: &'a [u8], tag: &[u8]) -> Option<&'a [u8]> {
    let mut remaining = data;
    while !remaining.is_empty() {
        let (current, value, rest) = next_element(remaining)?;
        if current == tag {
            return Some(value);
        }
        remaining = rest;
    }
    None
}

/// Descend through nested constructed templates, one tag per level.
pub fn find_path<'a>(data: &'a [u8], path: &[&[u8]]) -> Option<&'a [u8]> {
    path.iter().try_fold(data, |scope, tag| find_tag(scope, tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_tag_simple() {
        let data = &[0x84, 0x01, 0x05];
        assert_eq!(find_tag(data, &[0x84]), Some(&[0x05][..]));
    }

    #[test]
    fn test_find_tag_two_byte() {
        let data = &[0xBF, 0x0C, 0x02, 0xAB, 0xCD];
        assert_eq!(find_tag(data, &[0xBF, 0x0C]), Some(&[0xAB, 0xCD][..]));
    }

    #[test]
    fn test_find_tag_not_found() {
        let data = &[0x84, 0x01, 0x05];
        assert_eq!(find_tag(data, &[0xA5]), None);
    }

    #[test]
    fn test_find_tag_long_length() {
        let mut data = vec![0x53, 0x81, 0x80];
        data.extend(std::iter::repeat(0x11).take(0x80));
        assert_eq!(find_tag(&data, &[0x53]).map(<[u8]>::len), Some(0x80));
    }

    #[test]
    fn test_find_tag_truncated() {
        let data = &[0x84, 0x05, 0x01, 0x02];
        assert_eq!(find_tag(data, &[0x84]), None);
    }

    #[test]
    fn test_find_path_nested_fci() {
        // 6F { 84 DF name, A5 { BF0C { C7 serial } } }
        let data = &[
            0x6F, 0x0D, 0x84, 0x02, 0xA0, 0x00, 0xA5, 0x07, 0xBF, 0x0C, 0x04, 0xC7, 0x02, 0x12,
            0x34,
        ];
        assert_eq!(
            find_path(data, &[&[0x6F], &[0xA5], &[0xBF, 0x0C], &[0xC7]]),
            Some(&[0x12, 0x34][..])
        );
        assert_eq!(find_path(data, &[&[0x6F], &[0x84]]), Some(&[0xA0, 0x00][..]));
    }
}
