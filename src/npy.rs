use crate::RecordLayout;

pub const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// dtype strings that describe a single unsigned byte
const BYTE_DESCRS: [&str; 4] = ["|u1", "<u1", ">u1", "=u1"];

/// The parts of a numpy `.npy` header needed to check a dataset's layout.
///
/// A file starts with the magic string, a two byte version, the length of the header
/// text, and the header text itself: a python dict literal such as
/// `{'descr': '|u1', 'fortran_order': False, 'shape': (1000, 784), }`, padded with
/// spaces and terminated by a newline. The array data follows immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub major: u8,
    pub minor: u8,
    pub descr: String,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
    /// magic + version + header length field
    prefix_len: usize,
    header_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NpyError {
    BadMagic,
    UnsupportedVersion { major: u8, minor: u8 },
    /// The file ends inside the header
    Truncated,
    MalformedHeader(&'static str),
    UnsupportedDtype(String),
    FortranOrder,
    DataOffset { expected: usize, found: usize },
    RecordShape { expected: usize, shape: Vec<usize> },
    TooFewRecords { available: usize, requested: usize },
}

impl std::fmt::Display for NpyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NpyError::BadMagic => write!(f, "missing npy magic string"),
            NpyError::UnsupportedVersion { major, minor } => {
                write!(f, "unsupported format version {major}.{minor}")
            }
            NpyError::Truncated => write!(f, "file ends inside the header"),
            NpyError::MalformedHeader(what) => write!(f, "malformed header: {what}"),
            NpyError::UnsupportedDtype(descr) => {
                write!(f, "dtype {descr:?} is not a single unsigned byte")
            }
            NpyError::FortranOrder => write!(f, "array is stored in fortran order"),
            NpyError::DataOffset { expected, found } => {
                write!(f, "data starts at byte {found}, expected {expected}")
            }
            NpyError::RecordShape { expected, shape } => {
                write!(f, "shape {shape:?} does not hold records of {expected} bytes")
            }
            NpyError::TooFewRecords {
                available,
                requested,
            } => write!(f, "{requested} records requested but only {available} stored"),
        }
    }
}

impl std::error::Error for NpyError {}

pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

impl NpyHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, NpyError> {
        if !has_magic(bytes) {
            return Err(NpyError::BadMagic);
        }

        let (major, minor) = match bytes.get(6..8) {
            Some(&[major, minor]) => (major, minor),
            _ => return Err(NpyError::Truncated),
        };

        // version 1 has a u16 header length, 2 and 3 widened it to u32
        let (prefix_len, header_len) = match major {
            1 => {
                let len = bytes.get(8..10).ok_or(NpyError::Truncated)?;
                (10, u16::from_le_bytes([len[0], len[1]]) as usize)
            }
            2 | 3 => {
                let len = bytes.get(8..12).ok_or(NpyError::Truncated)?;
                (12, u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize)
            }
            _ => return Err(NpyError::UnsupportedVersion { major, minor }),
        };

        let text = bytes
            .get(prefix_len..prefix_len + header_len)
            .ok_or(NpyError::Truncated)?;
        let text = std::str::from_utf8(text)
            .map_err(|_| NpyError::MalformedHeader("header is not valid text"))?;

        let dict = HeaderDict::parse(text)?;

        Ok(Self {
            major,
            minor,
            descr: dict.descr,
            fortran_order: dict.fortran_order,
            shape: dict.shape,
            prefix_len,
            header_len,
        })
    }

    /// Offset of the first array element in the file
    pub fn data_offset(&self) -> usize {
        self.prefix_len + self.header_len
    }

    /// Number of records (the first dimension) in the array
    pub fn records(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Bytes per record: the product of every dimension after the first
    pub fn record_size(&self) -> Option<usize> {
        self.shape
            .iter()
            .skip(1)
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
    }

    /// Make sure that slicing this file with `layout` yields whole records of bytes
    pub fn check(&self, layout: &RecordLayout) -> Result<(), NpyError> {
        if self.data_offset() != layout.header_size {
            return Err(NpyError::DataOffset {
                expected: layout.header_size,
                found: self.data_offset(),
            });
        }

        if !BYTE_DESCRS.contains(&self.descr.as_str()) {
            return Err(NpyError::UnsupportedDtype(self.descr.clone()));
        }

        if self.fortran_order {
            return Err(NpyError::FortranOrder);
        }

        let expected = layout.width.checked_mul(layout.height);
        if self.shape.is_empty() || expected.is_none() || self.record_size() != expected {
            return Err(NpyError::RecordShape {
                expected: expected.unwrap_or(usize::MAX),
                shape: self.shape.clone(),
            });
        }

        if self.records() < layout.count {
            return Err(NpyError::TooFewRecords {
                available: self.records(),
                requested: layout.count,
            });
        }

        Ok(())
    }
}

#[derive(Default)]
struct HeaderDict {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

impl HeaderDict {
    fn parse(text: &str) -> Result<Self, NpyError> {
        let mut cursor = Cursor { rest: text };
        let mut dict = HeaderDict::default();
        let (mut descr, mut order, mut shape) = (false, false, false);

        cursor.expect('{')?;

        loop {
            if cursor.eat('}') {
                break;
            }

            let key = cursor.string()?;
            cursor.expect(':')?;

            match key {
                "descr" => {
                    dict.descr = cursor.string()?.to_owned();
                    descr = true;
                }
                "fortran_order" => {
                    dict.fortran_order = cursor.boolean()?;
                    order = true;
                }
                "shape" => {
                    dict.shape = cursor.tuple()?;
                    shape = true;
                }
                _ => return Err(NpyError::MalformedHeader("unexpected key")),
            }

            if !cursor.eat(',') {
                cursor.expect('}')?;
                break;
            }
        }

        if !cursor.rest.trim().is_empty() {
            return Err(NpyError::MalformedHeader("trailing characters after dict"));
        }

        if !(descr && order && shape) {
            return Err(NpyError::MalformedHeader("missing key"));
        }

        Ok(dict)
    }
}

/// Hand-rolled reader for the tiny subset of python literals that npy headers use
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    /// Consume `c` if it is the next non-whitespace character
    fn eat(&mut self, c: char) -> bool {
        self.skip_whitespace();
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn expect(&mut self, c: char) -> Result<(), NpyError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(NpyError::MalformedHeader("unexpected character"))
        }
    }

    fn string(&mut self) -> Result<&'a str, NpyError> {
        self.skip_whitespace();

        let quote = match self.rest.chars().next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(NpyError::MalformedHeader("expected a string")),
        };

        let rest = self.rest;
        let body = &rest[1..];
        let end = body
            .find(quote)
            .ok_or(NpyError::MalformedHeader("unterminated string"))?;

        self.rest = &body[end + 1..];
        Ok(&body[..end])
    }

    fn boolean(&mut self) -> Result<bool, NpyError> {
        self.skip_whitespace();

        if let Some(rest) = self.rest.strip_prefix("True") {
            self.rest = rest;
            Ok(true)
        } else if let Some(rest) = self.rest.strip_prefix("False") {
            self.rest = rest;
            Ok(false)
        } else {
            Err(NpyError::MalformedHeader("expected True or False"))
        }
    }

    fn integer(&mut self) -> Result<usize, NpyError> {
        self.skip_whitespace();

        let end = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        let (digits, rest) = self.rest.split_at(end);

        // older numpy versions wrote dimensions as python 2 longs, e.g. `1000L`
        self.rest = rest.strip_prefix('L').unwrap_or(rest);

        digits
            .parse()
            .map_err(|_| NpyError::MalformedHeader("expected a dimension"))
    }

    /// `()`, `(n,)` or `(n, m, ...)` with an optional trailing comma
    fn tuple(&mut self) -> Result<Vec<usize>, NpyError> {
        let mut dims = Vec::new();

        self.expect('(')?;

        loop {
            if self.eat(')') {
                break;
            }

            dims.push(self.integer()?);

            if !self.eat(',') {
                self.expect(')')?;
                break;
            }
        }

        Ok(dims)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::synthetic_dataset::npy_dataset;
    use crate::HEADER_SIZE;

    fn with_header(major: u8, text: &str) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[major, 0]);
        if major == 1 {
            bytes.extend_from_slice(&(text.len() as u16).to_le_bytes());
        } else {
            bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
        }
        bytes.extend_from_slice(text.as_bytes());
        bytes
    }

    #[test]
    fn quickdraw_header_is_80_bytes() {
        let bytes = npy_dataset("|u1", false, &[1000, 784], 0);
        let header = NpyHeader::parse(&bytes).unwrap();

        assert_eq!(header.major, 1);
        assert_eq!(header.descr, "|u1");
        assert!(!header.fortran_order);
        assert_eq!(header.shape, vec![1000, 784]);
        assert_eq!(header.data_offset(), HEADER_SIZE);
        assert_eq!(header.check(&RecordLayout::DEFAULT), Ok(()));
    }

    #[test]
    fn square_images_have_the_same_record_size() {
        let bytes = npy_dataset("<u1", false, &[1000, 28, 28], 0);
        let header = NpyHeader::parse(&bytes).unwrap();

        assert_eq!(header.record_size(), Some(784));
        assert_eq!(header.check(&RecordLayout::DEFAULT), Ok(()));
    }

    #[test]
    fn version_two_has_wide_length() {
        let text = "{'descr': '|u1', 'fortran_order': False, 'shape': (3, 784), }\n";
        let header = NpyHeader::parse(&with_header(2, text)).unwrap();

        assert_eq!(header.shape, vec![3, 784]);
        assert_eq!(header.data_offset(), 12 + text.len());
    }

    #[test]
    fn double_quotes_and_long_dimensions() {
        let text = "{\"shape\": (10L, 784L), \"fortran_order\": False, \"descr\": \"|u1\"}";
        let header = NpyHeader::parse(&with_header(1, text)).unwrap();

        assert_eq!(header.shape, vec![10, 784]);
    }

    #[test]
    fn one_dimensional_shape() {
        let text = "{'descr': '|u1', 'fortran_order': False, 'shape': (784,), }";
        let header = NpyHeader::parse(&with_header(1, text)).unwrap();

        assert_eq!(header.shape, vec![784]);
        assert_eq!(header.records(), 784);
        assert_eq!(header.record_size(), Some(1));
    }

    #[test]
    fn bad_magic_gives_error() {
        assert_eq!(NpyHeader::parse(&[0; 80]), Err(NpyError::BadMagic));
    }

    #[test]
    fn cut_off_header_gives_error() {
        let bytes = npy_dataset("|u1", false, &[1000, 784], 0);

        assert_eq!(NpyHeader::parse(&bytes[..7]), Err(NpyError::Truncated));
        assert_eq!(NpyHeader::parse(&bytes[..40]), Err(NpyError::Truncated));
    }

    #[test]
    fn unknown_version_gives_error() {
        let mut bytes = npy_dataset("|u1", false, &[1000, 784], 0);
        bytes[6] = 4;

        assert_eq!(
            NpyHeader::parse(&bytes),
            Err(NpyError::UnsupportedVersion { major: 4, minor: 0 })
        );
    }

    #[test]
    fn malformed_dicts_give_errors() {
        for text in [
            "'descr': '|u1'",
            "{'descr': '|u1', 'fortran_order': False}",
            "{'descr': '|u1', 'fortran_order': Nope, 'shape': (1,)}",
            "{'descr': '|u1, 'fortran_order': False, 'shape': (1,)}",
            "{'descr': '|u1', 'fortran_order': False, 'shape': (1,), 'extra': 1}",
            "{'descr': '|u1', 'fortran_order': False, 'shape': (x,)}",
        ] {
            assert!(
                matches!(
                    NpyHeader::parse(&with_header(1, text)),
                    Err(NpyError::MalformedHeader(_))
                ),
                "{text}"
            );
        }
    }

    #[test]
    fn wrong_dtype_is_rejected() {
        let bytes = npy_dataset("<f4", false, &[1000, 784], 0);
        let header = NpyHeader::parse(&bytes).unwrap();

        assert_eq!(
            header.check(&RecordLayout::DEFAULT),
            Err(NpyError::UnsupportedDtype("<f4".to_owned()))
        );
    }

    #[test]
    fn fortran_order_is_rejected() {
        let bytes = npy_dataset("|u1", true, &[1000, 784], 0);
        let header = NpyHeader::parse(&bytes).unwrap();

        assert_eq!(
            header.check(&RecordLayout::DEFAULT),
            Err(NpyError::FortranOrder)
        );
    }

    #[test]
    fn wrong_record_shape_is_rejected() {
        let bytes = npy_dataset("|u1", false, &[1000, 32, 32], 0);
        let header = NpyHeader::parse(&bytes).unwrap();

        assert_eq!(
            header.check(&RecordLayout::DEFAULT),
            Err(NpyError::RecordShape {
                expected: 784,
                shape: vec![1000, 32, 32]
            })
        );
    }

    #[test]
    fn too_few_records_is_rejected() {
        let bytes = npy_dataset("|u1", false, &[999, 784], 0);
        let header = NpyHeader::parse(&bytes).unwrap();

        assert_eq!(
            header.check(&RecordLayout::DEFAULT),
            Err(NpyError::TooFewRecords {
                available: 999,
                requested: 1000
            })
        );
    }

    #[test]
    fn padded_header_moves_the_data() {
        // numpy >= 1.17 aligns the data to 64 bytes, so the header grows to 128
        let mut text =
            String::from("{'descr': '|u1', 'fortran_order': False, 'shape': (1000, 784), }");
        while (10 + text.len() + 1) % 128 != 0 {
            text.push(' ');
        }
        text.push('\n');

        let header = NpyHeader::parse(&with_header(1, &text)).unwrap();

        assert_eq!(header.data_offset(), 128);
        assert_eq!(
            header.check(&RecordLayout::DEFAULT),
            Err(NpyError::DataOffset {
                expected: 80,
                found: 128
            })
        );
    }
}
