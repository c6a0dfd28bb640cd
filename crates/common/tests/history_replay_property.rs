use chrono::{DateTime, Duration, TimeZone, Utc};
use folio_common::diff::{apply_patch_ops, diff_to_patch_ops};
use folio_common::history::SNAPSHOT_INTERVAL;
use folio_common::VersionedText;
use proptest::collection::vec;
use proptest::prelude::*;

fn interesting_char() -> impl Strategy<Value = char> {
    prop_oneof![
        (b'a'..=b'z').prop_map(char::from),
        (b'0'..=b'9').prop_map(char::from),
        Just(' '),
        Just('\n'),
        Just('#'),
        Just('*'),
        Just('\u{E9}'),
        Just('\u{4E2D}'),
        Just('\u{1F642}'),
        Just('\u{05E9}'),
    ]
}

fn markdown_string(max_len: usize) -> impl Strategy<Value = String> {
    vec(interesting_char(), 0..max_len).prop_map(|chars| chars.into_iter().collect())
}

fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp")
}

/// Dedupe consecutive identical versions, the way `update` skips no-op writes.
fn distinct_versions(versions: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for version in versions {
        if out.last() != Some(version) {
            out.push(version.clone());
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn replay_reproduces_every_version(versions in vec(markdown_string(120), 1..80)) {
        let start = base_time();
        let mut history = VersionedText::new(&versions[0], start);
        for (i, version) in versions.iter().enumerate().skip(1) {
            history
                .update(version, start + Duration::seconds(i as i64))
                .expect("timestamps increase");
        }

        let expected = distinct_versions(&versions);
        let replayed = history.replay().expect("history should replay");
        prop_assert_eq!(&replayed, &expected);
        prop_assert_eq!(history.current(), expected.last().expect("at least one version").as_str());
    }

    #[test]
    fn as_of_returns_latest_version_not_after_timestamp(
        versions in vec(markdown_string(60), 1..(SNAPSHOT_INTERVAL * 2 + 5)),
        probe in 0i64..200,
    ) {
        let start = base_time();
        let mut history = VersionedText::new(&versions[0], start);
        // (seconds offset, content) for entries actually appended
        let mut appended = vec![(0i64, versions[0].clone())];
        for (i, version) in versions.iter().enumerate().skip(1) {
            let offset = i as i64 * 2;
            if history.update(version, start + Duration::seconds(offset)).expect("increasing") {
                appended.push((offset, version.clone()));
            }
        }

        let at = start + Duration::seconds(probe);
        let expected = appended
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= probe)
            .map(|(_, content)| content.clone());
        prop_assert_eq!(history.get_as_of(at).ok(), expected);
    }

    #[test]
    fn patch_applies_to_produce_target(
        before in markdown_string(400),
        after in markdown_string(400),
    ) {
        let ops = diff_to_patch_ops(&before, &after);
        prop_assert_eq!(apply_patch_ops(&before, &ops).expect("patch should apply"), after);
    }
}

#[test]
fn as_of_before_first_entry_is_an_error() {
    let history = VersionedText::new("first", base_time());
    assert!(history.get_as_of(base_time() - Duration::microseconds(1)).is_err());
}

#[test]
fn serialized_history_survives_decode_across_snapshot_boundaries() {
    let start = base_time();
    let mut history = VersionedText::new("v0", start);
    for i in 1..(SNAPSHOT_INTERVAL as i64 * 3) {
        history.update(&format!("line {i}\n{}", "x".repeat(i as usize)), start + Duration::seconds(i)).unwrap();
    }

    let json = serde_json::to_string(&history).unwrap();
    let decoded: VersionedText = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.replay().unwrap(), history.replay().unwrap());
}
