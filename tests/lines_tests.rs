mod common;

use common::assertions::{assert_bad_request, assert_not_found};
use common::harness::TestHarness;

use udlf_gateway::lines::{count_non_empty_lines, read_line};

#[tokio::test]
async fn test_read_line_is_one_indexed() {
    let harness = TestHarness::new();
    let path = harness.write("outputs/out.txt", "first\nsecond\r\nthird");

    assert_eq!(read_line(&path, 1).await.expect("line 1").as_deref(), Some("first"));
    assert_eq!(read_line(&path, 2).await.expect("line 2").as_deref(), Some("second"));
    assert_eq!(read_line(&path, 3).await.expect("line 3").as_deref(), Some("third"));
}

#[tokio::test]
async fn test_read_line_past_end_is_none() {
    let harness = TestHarness::new();
    let path = harness.write("outputs/out.txt", "only\n");
    assert_eq!(read_line(&path, 2).await.expect("past end"), None);

    let empty = harness.write("outputs/empty.txt", "");
    assert_eq!(read_line(&empty, 1).await.expect("empty file"), None);
}

#[tokio::test]
async fn test_read_line_keeps_blank_lines() {
    let harness = TestHarness::new();
    let path = harness.write("outputs/out.txt", "a\n\n  c  \n");
    assert_eq!(read_line(&path, 2).await.expect("blank line").as_deref(), Some(""));
    assert_eq!(read_line(&path, 3).await.expect("padded line").as_deref(), Some("  c  "));
}

#[tokio::test]
async fn test_read_line_errors() {
    let harness = TestHarness::new();
    let path = harness.write("outputs/out.txt", "x\n");
    assert_bad_request(read_line(&path, 0).await);
    assert_not_found(read_line(&harness.root().join("nope.txt"), 1).await);
}

#[tokio::test]
async fn test_count_non_empty_lines() {
    let harness = TestHarness::new();
    let path = harness.write("outputs/ranked.txt", "1 2 3\n\n   \n4 5 6\r\n7\n");
    assert_eq!(count_non_empty_lines(&path).await.expect("count"), 3);
    assert_not_found(count_non_empty_lines(&harness.root().join("nope.txt")).await);
}

#[tokio::test]
async fn test_read_line_large_file() {
    let harness = TestHarness::new();
    let body: String = (1..=20_000).map(|i| format!("{i}\n")).collect();
    let path = harness.write("outputs/big.txt", body);
    assert_eq!(read_line(&path, 19_999).await.expect("deep line").as_deref(), Some("19999"));
    assert_eq!(count_non_empty_lines(&path).await.expect("count"), 20_000);
}
