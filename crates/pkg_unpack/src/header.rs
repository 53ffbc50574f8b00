//! The ustar header block that precedes every archive entry.

use std::ops::Range;

use crate::numeric::{parse_octal, NumericFieldError};

/// The size of a header block. Entry contents are padded to a multiple of this size.
pub const BLOCK_SIZE: usize = 512;

const NAME: Range<usize> = 0..100;
const MODE: Range<usize> = 100..108;
const UID: Range<usize> = 108..116;
const GID: Range<usize> = 116..124;
const SIZE: Range<usize> = 124..136;
const MTIME: Range<usize> = 136..148;
const TYPE_FLAG: usize = 156;
const LINK_NAME: Range<usize> = 157..257;
const DEV_MAJOR: Range<usize> = 329..337;
const DEV_MINOR: Range<usize> = 337..345;
const PREFIX: Range<usize> = 345..500;

/// The type of object described by a header.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EntryType {
    /// A regular file, tagged `'0'` or with the old style nul tag.
    Regular,
    /// A hard link to a file that appeared earlier in the archive.
    HardLink,
    /// A symbolic link.
    Symlink,
    /// A character special device.
    CharDevice,
    /// A block special device.
    BlockDevice,
    /// A directory.
    Directory,
    /// A named pipe.
    Fifo,
    /// A contiguous file, extracted like a regular file.
    Contiguous,
}

impl EntryType {
    /// Returns the entry type for a type tag, or `None` if the tag is not supported.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'\0' | b'0' => Some(EntryType::Regular),
            b'1' => Some(EntryType::HardLink),
            b'2' => Some(EntryType::Symlink),
            b'3' => Some(EntryType::CharDevice),
            b'4' => Some(EntryType::BlockDevice),
            b'5' => Some(EntryType::Directory),
            b'6' => Some(EntryType::Fifo),
            b'7' => Some(EntryType::Contiguous),
            _ => None,
        }
    }
}

/// A single raw header block.
///
/// All accessors only look at the bytes of their own field: text fields are cut at the first nul
/// byte or at the end of the field, whichever comes first.
#[derive(Debug, Clone)]
pub struct Header {
    block: [u8; BLOCK_SIZE],
}

impl Header {
    /// Wraps a raw block.
    pub fn from_bytes(block: [u8; BLOCK_SIZE]) -> Self {
        Self { block }
    }

    /// Returns true if this block marks the end of the archive, which is the case when the name
    /// field is empty.
    pub fn is_terminator(&self) -> bool {
        self.block[NAME.start] == 0
    }

    /// Returns the full path of the entry: the prefix (if any), a slash and the name.
    pub fn path_bytes(&self) -> Vec<u8> {
        let prefix = bounded(&self.block[PREFIX]);
        let name = bounded(&self.block[NAME]);

        let mut path = Vec::with_capacity(prefix.len() + 1 + name.len());
        if !prefix.is_empty() {
            path.extend_from_slice(prefix);
            path.push(b'/');
        }
        path.extend_from_slice(name);
        path
    }

    /// Returns the link target of hard and symbolic links.
    pub fn link_name_bytes(&self) -> &[u8] {
        bounded(&self.block[LINK_NAME])
    }

    /// Returns the raw type tag.
    pub fn entry_tag(&self) -> u8 {
        self.block[TYPE_FLAG]
    }

    /// Returns the decoded entry type, or `None` if the tag is not supported.
    pub fn entry_type(&self) -> Option<EntryType> {
        EntryType::from_tag(self.entry_tag())
    }

    /// Returns the permission bits.
    pub fn mode(&self) -> Result<u64, NumericFieldError> {
        parse_octal(&self.block[MODE])
    }

    /// Returns the id of the owning user.
    pub fn uid(&self) -> Result<u64, NumericFieldError> {
        parse_octal(&self.block[UID])
    }

    /// Returns the id of the owning group.
    pub fn gid(&self) -> Result<u64, NumericFieldError> {
        parse_octal(&self.block[GID])
    }

    /// Returns the size of the entry content in bytes, excluding padding.
    pub fn size(&self) -> Result<u64, NumericFieldError> {
        parse_octal(&self.block[SIZE])
    }

    /// Returns the modification time in seconds since the unix epoch.
    pub fn mtime(&self) -> Result<u64, NumericFieldError> {
        parse_octal(&self.block[MTIME])
    }

    /// Returns the major device number.
    pub fn device_major(&self) -> Result<u64, NumericFieldError> {
        parse_octal(&self.block[DEV_MAJOR])
    }

    /// Returns the minor device number.
    pub fn device_minor(&self) -> Result<u64, NumericFieldError> {
        parse_octal(&self.block[DEV_MINOR])
    }
}

/// Returns the number of bytes occupied by `size` bytes of content including padding.
pub fn padded_size(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

/// Cuts a text field at its first nul byte.
fn bounded(field: &[u8]) -> &[u8] {
    match field.iter().position(|&b| b == 0) {
        Some(end) => &field[..end],
        None => field,
    }
}

#[cfg(test)]
mod tests {
    use super::{padded_size, EntryType, Header, BLOCK_SIZE};
    use rstest::rstest;

    fn header_with(fields: &[(usize, &[u8])]) -> Header {
        let mut block = [0u8; BLOCK_SIZE];
        for (offset, value) in fields {
            block[*offset..*offset + value.len()].copy_from_slice(value);
        }
        Header::from_bytes(block)
    }

    #[test]
    fn test_path_with_prefix() {
        let header = header_with(&[(0, b"file.txt"), (345, b"usr/share/doc")]);
        assert_eq!(header.path_bytes(), b"usr/share/doc/file.txt");
    }

    #[test]
    fn test_unterminated_fields_are_bounded() {
        // A name filling the whole field runs straight into the mode field.
        let name = [b'n'; 100];
        let link_name = [b'l'; 100];
        let header = header_with(&[
            (0, &name),
            (100, b"0000644\0"),
            (157, &link_name),
            (257, b"ustar\0"),
        ]);

        assert_eq!(header.path_bytes(), name);
        assert_eq!(header.link_name_bytes(), link_name);
        assert_eq!(header.mode().unwrap(), 0o644);
    }

    #[test]
    fn test_terminator() {
        assert!(header_with(&[]).is_terminator());
        // Only the name decides, other fields may contain anything.
        assert!(header_with(&[(100, b"0000644\0"), (345, b"prefix")]).is_terminator());
        assert!(!header_with(&[(0, b"a")]).is_terminator());
    }

    #[test]
    fn test_numeric_fields() {
        let header = header_with(&[
            (100, b"0000755\0"),
            (108, b"0001750\0"),
            (116, b"0000144\0"),
            (124, b"00000001000\0"),
            (136, b"14712345670\0"),
            (329, b"0000010\0"),
            (337, b"0000003\0"),
        ]);
        assert_eq!(header.mode().unwrap(), 0o755);
        assert_eq!(header.uid().unwrap(), 1000);
        assert_eq!(header.gid().unwrap(), 100);
        assert_eq!(header.size().unwrap(), 512);
        assert_eq!(header.mtime().unwrap(), 0o14712345670);
        assert_eq!(header.device_major().unwrap(), 8);
        assert_eq!(header.device_minor().unwrap(), 3);
    }

    #[rstest]
    #[case(b'\0', Some(EntryType::Regular))]
    #[case(b'0', Some(EntryType::Regular))]
    #[case(b'1', Some(EntryType::HardLink))]
    #[case(b'2', Some(EntryType::Symlink))]
    #[case(b'3', Some(EntryType::CharDevice))]
    #[case(b'4', Some(EntryType::BlockDevice))]
    #[case(b'5', Some(EntryType::Directory))]
    #[case(b'6', Some(EntryType::Fifo))]
    #[case(b'7', Some(EntryType::Contiguous))]
    #[case(b'L', None)]
    #[case(b'x', None)]
    fn test_entry_type_tags(#[case] tag: u8, #[case] expected: Option<EntryType>) {
        assert_eq!(header_with(&[(156, &[tag])]).entry_type(), expected);
    }

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), 0);
        assert_eq!(padded_size(1), 512);
        assert_eq!(padded_size(512), 512);
        assert_eq!(padded_size(513), 1024);
    }
}
