pub mod filter;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use sha2::{Digest, Sha256};

pub use filter::{MAX_TITLE_LEN, PageRow, RedirectRow, qualify_page, qualify_redirect};

const TUPLE_BOUNDARY: &str = "),(";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpTable {
    Redirect,
    Page,
}

impl DumpTable {
    pub fn preamble(self) -> &'static str {
        match self {
            Self::Redirect => "INSERT INTO `redirect` VALUES",
            Self::Page => "INSERT INTO `page` VALUES",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::Page => "page",
        }
    }

    pub fn is_insert_line(self, line: &str) -> bool {
        line.starts_with(self.preamble())
    }
}

/// Splits one bulk-insert line into raw field tuples.
///
/// Lines that do not start with the table's preamble yield nothing. The split
/// is purely literal: a quoted field containing `,` or `),(` is cut apart.
pub fn parse_line(line: &str, table: DumpTable) -> Vec<Vec<&str>> {
    let Some(body) = line.strip_prefix(table.preamble()) else {
        return Vec::new();
    };
    let body = body
        .trim_start()
        .trim_end_matches(|ch: char| ch == ';' || ch.is_whitespace());
    if body.is_empty() {
        return Vec::new();
    }

    body.split(TUPLE_BOUNDARY)
        .map(|fragment| {
            fragment
                .trim_matches('(')
                .trim_matches(')')
                .split(',')
                .collect()
        })
        .collect()
}

/// Line reader over a dump that digests every byte it hands out.
pub struct DumpLines<R> {
    reader: R,
    hasher: Sha256,
    buf: Vec<u8>,
    line_number: usize,
}

impl DumpLines<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::with_capacity(256 * 1024, file)))
    }
}

impl<R: BufRead> DumpLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: Sha256::new(),
            buf: Vec::new(),
            line_number: 0,
        }
    }

    /// Returns the next line (1-based number, text without the newline).
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn next_line(&mut self) -> io::Result<Option<(usize, String)>> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }
        self.hasher.update(&self.buf);
        self.line_number += 1;

        let mut end = self.buf.len();
        while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let text = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        Ok(Some((self.line_number, text)))
    }

    pub fn lines_read(&self) -> usize {
        self.line_number
    }

    /// Hex SHA-256 of everything read so far.
    pub fn finish_digest(self) -> String {
        let digest = self.hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_line_yields_one_tuple_per_row() {
        let line = "INSERT INTO `page` VALUES (1,0,'ab','xy',1),(2,0,'cd','zz',0);";
        let tuples = parse_line(line, DumpTable::Page);
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0], vec!["1", "0", "'ab'", "'xy'", "1"]);
        assert_eq!(tuples[1], vec!["2", "0", "'cd'", "'zz'", "0"]);

        let qualifying = tuples
            .iter()
            .filter_map(|fields| qualify_page(fields))
            .collect::<Vec<_>>();
        assert_eq!(qualifying.len(), 1);
        assert_eq!(qualifying[0].page_id, 1);
    }

    #[test]
    fn redirect_line_strips_full_preamble() {
        let line = "INSERT INTO `redirect` VALUES (10,0,'Ab','',''),(11,4,'Cd','','');\n";
        let tuples = parse_line(line, DumpTable::Redirect);
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0][0], "10");
        assert_eq!(tuples[1][..3], ["11", "4", "'Cd'"]);
    }

    #[test]
    fn line_for_other_table_yields_nothing() {
        let line = "INSERT INTO `page` VALUES (1,0,'ab','xy',1);";
        assert!(parse_line(line, DumpTable::Redirect).is_empty());
        assert!(parse_line("-- MySQL dump 10.13", DumpTable::Page).is_empty());
        assert!(parse_line("", DumpTable::Page).is_empty());
    }

    #[test]
    fn preamble_without_values_yields_nothing() {
        assert!(parse_line("INSERT INTO `page` VALUES ;", DumpTable::Page).is_empty());
    }

    #[test]
    fn quoted_delimiters_are_split_literally() {
        let line = "INSERT INTO `redirect` VALUES (5,0,'a,b','','');";
        let tuples = parse_line(line, DumpTable::Redirect);
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0][2], "'a");
        assert_eq!(tuples[0][3], "b'");
    }

    #[test]
    fn dump_lines_numbers_lines_and_digests_input() {
        let input = b"first\r\nsecond\n\xffthird";
        let mut lines = DumpLines::new(&input[..]);
        assert_eq!(
            lines.next_line().expect("read"),
            Some((1, "first".to_string()))
        );
        assert_eq!(
            lines.next_line().expect("read"),
            Some((2, "second".to_string()))
        );
        let (number, text) = lines.next_line().expect("read").expect("third line");
        assert_eq!(number, 3);
        assert!(text.ends_with("third"));
        assert_eq!(lines.next_line().expect("read"), None);
        assert_eq!(lines.lines_read(), 3);

        let digest = lines.finish_digest();
        assert_eq!(digest.len(), 64);

        let mut again = DumpLines::new(&input[..]);
        while again.next_line().expect("read").is_some() {}
        assert_eq!(again.finish_digest(), digest);
    }
}
