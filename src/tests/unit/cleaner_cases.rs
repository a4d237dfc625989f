//! Cleaner Line Filter Cases

use rstest::rstest;

use crate::ingestion::cleaner::{is_copyright_line, is_page_number_line};

#[rstest]
#[case("12", true)]
#[case("Page 3", true)]
#[case("page 3 of 40", true)]
#[case("- 7 -", true)]
#[case("12 Rats", false)]
#[case("1: Parry", false)]
#[case("Sword 10gc", false)]
fn test_page_number_lines(#[case] line: &str, #[case] expected: bool) {
    assert_eq!(is_page_number_line(line), expected, "line: {line:?}");
}

#[rstest]
#[case("© 2023 Games Workshop", true)]
#[case("Copyright Games Workshop Limited", true)]
#[case("All rights reserved.", true)]
#[case("(c) 1999 the authors", true)]
#[case("Heroes may copy one skill", false)]
fn test_copyright_lines(#[case] line: &str, #[case] expected: bool) {
    assert_eq!(is_copyright_line(line), expected, "line: {line:?}");
}
