use assert_matches::assert_matches;

use sat_collocate::domain::{SceneFilename, SelectionRelation, parse_timestamp};
use sat_collocate::error::CollocateError;

#[test]
fn parse_scene_filename_valid() {
    let scene: SceneFilename =
        "S1A_IW_SLC__1SDV_20190107T171737_20190107T171804_025416_02D11A_2417.zip"
            .parse()
            .unwrap();
    assert_eq!(
        scene.start_time().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "2019-01-07T17:17:37"
    );
}

#[test]
fn parse_scene_filename_windows_path() {
    let scene: SceneFilename =
        r"D:\scenes\S1B_IW_RAW__0SDV_20190107T171737_20190107T171910_014539_01B171_8F51.zip"
            .parse()
            .unwrap();
    assert_eq!(
        scene.name(),
        "S1B_IW_RAW__0SDV_20190107T171737_20190107T171910_014539_01B171_8F51.zip"
    );
}

#[test]
fn parse_scene_filename_invalid() {
    let err = "granule.zip".parse::<SceneFilename>().unwrap_err();
    assert_matches!(err, CollocateError::SceneFilename(_));
}

#[test]
fn parse_timestamp_fractional_seconds() {
    let parsed = parse_timestamp("2019-01-07T17:17:37.123456").unwrap();
    assert_eq!(
        parsed.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        "2019-01-07T17:17:37.123456"
    );
}

#[test]
fn parse_timestamp_normalizes_offsets_to_utc() {
    let parsed = parse_timestamp("2019-01-07T19:17:37+02:00").unwrap();
    assert_eq!(parsed, parse_timestamp("2019-01-07T17:17:37Z").unwrap());
}

#[test]
fn parse_timestamp_compact_date() {
    let parsed = parse_timestamp("20190107").unwrap();
    assert_eq!(
        parsed.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "2019-01-07T00:00:00"
    );
}

#[test]
fn relation_parse_is_case_insensitive() {
    assert_eq!(
        "AFTER".parse::<SelectionRelation>().unwrap(),
        SelectionRelation::After
    );
    assert_eq!(
        " Any ".parse::<SelectionRelation>().unwrap(),
        SelectionRelation::Any
    );
}
