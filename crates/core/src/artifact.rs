use chrono::NaiveDateTime;

pub const ARTIFACT_EXTENSION: &str = "zip";

/// Second resolution; lexical order equals chronological order.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Name of the archive produced by one backup run: `{database}_{YYYYMMDD_HHMMSS}.zip`.
pub fn artifact_file_name(database: &str, at: NaiveDateTime) -> String {
    format!(
        "{database}_{}.{ARTIFACT_EXTENSION}",
        at.format(TIMESTAMP_FORMAT)
    )
}

/// Recover the creation timestamp from an artifact name produced for `database`.
pub fn parse_artifact_timestamp(database: &str, file_name: &str) -> Option<NaiveDateTime> {
    let stamp = file_name
        .strip_prefix(database)?
        .strip_prefix('_')?
        .strip_suffix(ARTIFACT_EXTENSION)?
        .strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}
