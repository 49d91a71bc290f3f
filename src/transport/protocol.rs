/// Prefix of the header line that opens a file transfer.
pub const SENDING_PREFIX: &str = "SENDING:";
/// Token written by the device after the file contents.
pub const END_OF_FILE: &[u8] = b"END_OF_FILE";
pub const LIST_HEADER: &str = "Files on SD card:";
pub const LIST_FOOTER: &str = "End of file list";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    List,
    Get(String),
    Help,
    Delete(String),
    DeleteAll,
}

impl Command {
    /// Wire form, newline included.
    pub fn to_line(&self) -> String {
        match self {
            Command::List => "LIST\n".into(),
            Command::Get(name) => format!("GET {name}\n"),
            Command::Help => "HELP\n".into(),
            Command::Delete(name) => format!("DELETE {name}\n"),
            Command::DeleteAll => "DELETE_ALL\n".into(),
        }
    }
}

/// Name and announced size of a `SENDING:<name>:<size>` header. `None` when
/// the line is not a header; the size is `None` when it does not parse.
pub fn parse_sending_header(line: &str) -> Option<(String, Option<u64>)> {
    let rest = line.trim().strip_prefix(SENDING_PREFIX)?;
    match rest.rsplit_once(':') {
        Some((name, size)) => Some((name.to_string(), size.trim().parse().ok())),
        None => Some((rest.to_string(), None)),
    }
}

/// A file on the SD card as reported by `LIST`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: Option<u64>,
}

/// Entries of a `LIST` reply: every `name (size bytes)` line between the
/// banner and the footer. Lines without a parenthesis are skipped.
pub fn parse_listing(text: &str) -> Vec<FileEntry> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with(LIST_HEADER) && !line.starts_with(LIST_FOOTER)
        })
        .filter_map(|line| {
            let (name, detail) = line.split_once('(')?;
            let size = detail
                .trim_end_matches(')')
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok());
            Some(FileEntry {
                name: name.trim().to_string(),
                size,
            })
        })
        .collect()
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_newline_terminated() {
        assert_eq!(Command::List.to_line(), "LIST\n");
        assert_eq!(Command::Get("data_3.bin".into()).to_line(), "GET data_3.bin\n");
        assert_eq!(Command::DeleteAll.to_line(), "DELETE_ALL\n");
    }

    #[test]
    fn header_carries_name_and_size() {
        assert_eq!(
            parse_sending_header("SENDING:data_1.bin:2400\r"),
            Some(("data_1.bin".into(), Some(2400)))
        );
        assert_eq!(
            parse_sending_header("SENDING:data_1.bin:??"),
            Some(("data_1.bin".into(), None))
        );
        assert_eq!(parse_sending_header("data_1.bin (2400 bytes)"), None);
    }

    #[test]
    fn listing_skips_banner_and_noise() {
        let text = "Files on SD card:\n\
                    data_1.bin (2400 bytes)\n\
                    \n\
                    garbage line\n\
                    data_2.bin (48 bytes)\r\n\
                    End of file list\n";
        assert_eq!(
            parse_listing(text),
            vec![
                FileEntry { name: "data_1.bin".into(), size: Some(2400) },
                FileEntry { name: "data_2.bin".into(), size: Some(48) },
            ]
        );
    }

    #[test]
    fn sentinel_search() {
        assert_eq!(find_subsequence(b"abcEND_OF_FILE\n", END_OF_FILE), Some(3));
        assert_eq!(find_subsequence(b"END_OF_FIL", END_OF_FILE), None);
    }
}
