//! Conversion of raw API items into fixed-schema rows.
//!
//! Normalization is pure: no I/O, no hidden state, so the same item always
//! yields the same row. A missing required field aborts with a
//! [`MalformedRecordError`] instead of producing a partial row.
//!
//! Two documented policies apply:
//! - a commit whose author block is missing or lacks a name or email takes its
//!   identity and date from the committer block instead;
//! - an item the issues endpoint marks with a `pull_request` key is an ordinary
//!   issue row here (flagged in `isPullRequest`); dropping such items is the
//!   caller's choice, see [`is_pull_request`].

use crate::error::MalformedRecordError;
use crate::types::{RawItem, RecordKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

pub const COMMIT_COLUMNS: &[&str] = &[
    "sha",
    "authorName",
    "authorEmail",
    "authoredDate",
    "message",
    "url",
];

pub const ISSUE_COLUMNS: &[&str] = &[
    "number",
    "title",
    "state",
    "createdDate",
    "closedDate",
    "authorLogin",
    "commentCount",
    "url",
    "id",
    "isPullRequest",
    "openDurationDays",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_date: DateTime<Utc>,
    /// Full message; embedded newlines are kept.
    pub message: String,
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssueRecord {
    pub number: u64,
    /// Global identifier, distinct from the per-repository `number`.
    pub id: u64,
    pub title: String,
    pub state: IssueState,
    pub created_date: DateTime<Utc>,
    /// Always `None` while the issue is open.
    pub closed_date: Option<DateTime<Utc>>,
    pub author_login: String,
    pub comment_count: u64,
    pub url: String,
    pub is_pull_request: bool,
}

impl IssueRecord {
    /// Whole days between creation and close.
    pub fn open_duration_days(&self) -> Option<i64> {
        self.closed_date
            .map(|closed| (closed - self.created_date).num_days())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedRow {
    Commit(CommitRecord),
    Issue(IssueRecord),
}

impl NormalizedRow {
    pub fn kind(&self) -> RecordKind {
        match self {
            NormalizedRow::Commit(_) => RecordKind::Commit,
            NormalizedRow::Issue(_) => RecordKind::Issue,
        }
    }

    /// Column names for a record kind, in output order.
    pub fn columns(kind: RecordKind) -> &'static [&'static str] {
        match kind {
            RecordKind::Commit => COMMIT_COLUMNS,
            RecordKind::Issue => ISSUE_COLUMNS,
        }
    }

    /// Field values aligned with [`NormalizedRow::columns`]. Null values become
    /// empty fields.
    pub fn fields(&self) -> Vec<String> {
        match self {
            NormalizedRow::Commit(c) => vec![
                c.sha.clone(),
                c.author_name.clone(),
                c.author_email.clone(),
                format_timestamp(&c.authored_date),
                c.message.clone(),
                c.url.clone(),
            ],
            NormalizedRow::Issue(i) => vec![
                i.number.to_string(),
                i.title.clone(),
                i.state.as_str().to_string(),
                format_timestamp(&i.created_date),
                i.closed_date.as_ref().map(format_timestamp).unwrap_or_default(),
                i.author_login.clone(),
                i.comment_count.to_string(),
                i.url.clone(),
                i.id.to_string(),
                i.is_pull_request.to_string(),
                i.open_duration_days()
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
            ],
        }
    }
}

/// Canonical ISO-8601 form used in every output row, e.g. `2024-01-02T03:04:05Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Whether an issues-endpoint item is really a pull request.
pub fn is_pull_request(raw: &RawItem) -> bool {
    raw.get("pull_request").is_some_and(|v| !v.is_null())
}

pub fn normalize(raw: &RawItem, kind: RecordKind) -> Result<NormalizedRow, MalformedRecordError> {
    match kind {
        RecordKind::Commit => normalize_commit(raw).map(NormalizedRow::Commit),
        RecordKind::Issue => normalize_issue(raw).map(NormalizedRow::Issue),
    }
}

/// Field lookup that remembers which item it is reading, for error reports.
struct Fields<'a> {
    kind: RecordKind,
    identifier: String,
    raw: &'a RawItem,
}

impl<'a> Fields<'a> {
    fn missing(&self, field: &'static str) -> MalformedRecordError {
        MalformedRecordError {
            kind: self.kind,
            identifier: self.identifier.clone(),
            field,
        }
    }

    /// Walks a dotted path such as `commit.author.name`; null counts as absent.
    fn lookup(&self, path: &str) -> Option<&'a Value> {
        let mut parts = path.split('.');
        let mut value = self.raw.get(parts.next()?)?;
        for part in parts {
            value = value.get(part)?;
        }
        (!value.is_null()).then_some(value)
    }

    fn string(&self, path: &'static str) -> Result<String, MalformedRecordError> {
        self.lookup(path)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.missing(path))
    }

    fn non_empty_string(&self, path: &'static str) -> Option<String> {
        self.lookup(path)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn unsigned(&self, path: &'static str) -> Result<u64, MalformedRecordError> {
        self.lookup(path)
            .and_then(Value::as_u64)
            .ok_or_else(|| self.missing(path))
    }

    fn timestamp(&self, path: &'static str) -> Result<DateTime<Utc>, MalformedRecordError> {
        let raw = self.string(path)?;
        parse_timestamp(&raw).ok_or_else(|| self.missing(path))
    }

    fn optional_timestamp(
        &self,
        path: &'static str,
    ) -> Result<Option<DateTime<Utc>>, MalformedRecordError> {
        match self.lookup(path) {
            None => Ok(None),
            Some(_) => self.timestamp(path).map(Some),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn normalize_commit(raw: &RawItem) -> Result<CommitRecord, MalformedRecordError> {
    let mut fields = Fields {
        kind: RecordKind::Commit,
        identifier: "<unknown>".to_string(),
        raw,
    };
    let sha = fields.string("sha")?;
    fields.identifier = sha.clone();

    let author_name = fields.non_empty_string("commit.author.name");
    let author_email = fields.non_empty_string("commit.author.email");

    let (author_name, author_email, authored_date) = match (author_name, author_email) {
        (Some(name), Some(email)) => (name, email, fields.timestamp("commit.author.date")?),
        _ => (
            fields.string("commit.committer.name")?,
            fields.string("commit.committer.email")?,
            fields.timestamp("commit.committer.date")?,
        ),
    };

    Ok(CommitRecord {
        sha,
        author_name,
        author_email,
        authored_date,
        message: fields.string("commit.message")?,
        url: fields.string("html_url")?,
    })
}

fn normalize_issue(raw: &RawItem) -> Result<IssueRecord, MalformedRecordError> {
    let mut fields = Fields {
        kind: RecordKind::Issue,
        identifier: "<unknown>".to_string(),
        raw,
    };
    let number = fields.unsigned("number")?;
    fields.identifier = format!("#{number}");

    let state = match fields.string("state")?.as_str() {
        "open" => IssueState::Open,
        "closed" => IssueState::Closed,
        _ => return Err(fields.missing("state")),
    };

    // A reopened issue can still carry its old close time.
    let closed_date = match state {
        IssueState::Open => None,
        IssueState::Closed => fields.optional_timestamp("closed_at")?,
    };

    Ok(IssueRecord {
        number,
        id: fields.unsigned("id")?,
        title: fields.string("title")?,
        state,
        created_date: fields.timestamp("created_at")?,
        closed_date,
        author_login: fields.string("user.login")?,
        comment_count: fields.unsigned("comments")?,
        url: fields.string("html_url")?,
        is_pull_request: is_pull_request(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn item(value: Value) -> RawItem {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn commit_json() -> Value {
        json!({
            "sha": "6dcb09b5b57875f334f61aebed695e2e4193db5e",
            "html_url": "https://github.com/octocat/Hello-World/commit/6dcb09b",
            "commit": {
                "author": {
                    "name": "Monalisa Octocat",
                    "email": "support@github.com",
                    "date": "2011-04-14T16:00:49Z"
                },
                "committer": {
                    "name": "GitHub",
                    "email": "noreply@github.com",
                    "date": "2011-04-15T10:00:00+02:00"
                },
                "message": "Fix all the bugs\n\nLonger description, with a comma"
            }
        })
    }

    fn issue_json() -> Value {
        json!({
            "id": 1,
            "number": 1347,
            "title": "Found a bug",
            "state": "closed",
            "created_at": "2011-04-22T13:33:48Z",
            "closed_at": "2011-04-25T14:00:00Z",
            "user": { "login": "octocat" },
            "comments": 3,
            "html_url": "https://github.com/octocat/Hello-World/issues/1347"
        })
    }

    #[test]
    fn test_commit_uses_author_block() {
        let row = normalize(&item(commit_json()), RecordKind::Commit).unwrap();
        let NormalizedRow::Commit(commit) = row else {
            panic!("expected a commit row");
        };

        assert_eq!(commit.author_name, "Monalisa Octocat");
        assert_eq!(commit.author_email, "support@github.com");
        assert_eq!(
            commit.authored_date,
            Utc.with_ymd_and_hms(2011, 4, 14, 16, 0, 49).unwrap()
        );
        assert_eq!(
            commit.message,
            "Fix all the bugs\n\nLonger description, with a comma"
        );
        assert_eq!(
            commit.url,
            "https://github.com/octocat/Hello-World/commit/6dcb09b"
        );
    }

    #[test]
    fn test_commit_falls_back_to_committer() {
        let mut raw = commit_json();
        raw["commit"]["author"] = Value::Null;

        let row = normalize(&item(raw), RecordKind::Commit).unwrap();

        assert_eq!(
            row.fields(),
            vec![
                "6dcb09b5b57875f334f61aebed695e2e4193db5e".to_string(),
                "GitHub".to_string(),
                "noreply@github.com".to_string(),
                "2011-04-15T08:00:00Z".to_string(),
                "Fix all the bugs\n\nLonger description, with a comma".to_string(),
                "https://github.com/octocat/Hello-World/commit/6dcb09b".to_string(),
            ]
        );
    }

    #[test]
    fn test_commit_with_blank_author_email_falls_back() {
        let mut raw = commit_json();
        raw["commit"]["author"]["email"] = json!("");

        let row = normalize(&item(raw), RecordKind::Commit).unwrap();
        let NormalizedRow::Commit(commit) = row else {
            panic!("expected a commit row");
        };
        assert_eq!(commit.author_email, "noreply@github.com");
    }

    #[test]
    fn test_commit_missing_sha_is_malformed() {
        let mut raw = commit_json();
        raw.as_object_mut().unwrap().remove("sha");

        let err = normalize(&item(raw), RecordKind::Commit).unwrap_err();
        assert_eq!(err.field, "sha");
        assert_eq!(err.identifier, "<unknown>");
    }

    #[test]
    fn test_commit_missing_message_reports_sha() {
        let mut raw = commit_json();
        raw["commit"].as_object_mut().unwrap().remove("message");

        let err = normalize(&item(raw), RecordKind::Commit).unwrap_err();
        assert_eq!(err.field, "commit.message");
        assert_eq!(err.identifier, "6dcb09b5b57875f334f61aebed695e2e4193db5e");
    }

    #[test]
    fn test_commit_without_any_identity_is_malformed() {
        let mut raw = commit_json();
        raw["commit"]["author"] = Value::Null;
        raw["commit"]["committer"] = Value::Null;

        let err = normalize(&item(raw), RecordKind::Commit).unwrap_err();
        assert_eq!(err.field, "commit.committer.name");
    }

    #[test]
    fn test_closed_issue_row() {
        let row = normalize(&item(issue_json()), RecordKind::Issue).unwrap();

        assert_eq!(row.kind(), RecordKind::Issue);
        assert_eq!(
            row.fields(),
            vec![
                "1347",
                "Found a bug",
                "closed",
                "2011-04-22T13:33:48Z",
                "2011-04-25T14:00:00Z",
                "octocat",
                "3",
                "https://github.com/octocat/Hello-World/issues/1347",
                "1",
                "false",
                "3",
            ]
        );
    }

    #[test]
    fn test_open_issue_has_no_closed_date() {
        let mut raw = issue_json();
        raw["state"] = json!("open");

        let row = normalize(&item(raw), RecordKind::Issue).unwrap();
        let NormalizedRow::Issue(issue) = &row else {
            panic!("expected an issue row");
        };

        assert_eq!(issue.closed_date, None);
        assert_eq!(row.fields()[4], "");
        assert_eq!(row.fields()[10], "");
    }

    #[test]
    fn test_pull_request_is_included_and_flagged() {
        let mut raw = issue_json();
        raw["pull_request"] = json!({ "url": "https://api.github.com/repos/o/r/pulls/1347" });
        let raw = item(raw);

        assert!(is_pull_request(&raw));
        let NormalizedRow::Issue(issue) = normalize(&raw, RecordKind::Issue).unwrap() else {
            panic!("expected an issue row");
        };
        assert!(issue.is_pull_request);
    }

    #[test]
    fn test_issue_with_unknown_state_is_malformed() {
        let mut raw = issue_json();
        raw["state"] = json!("merged");

        let err = normalize(&item(raw), RecordKind::Issue).unwrap_err();
        assert_eq!(err.field, "state");
        assert_eq!(err.identifier, "#1347");
    }

    #[test]
    fn test_issue_missing_id_is_malformed() {
        let mut raw = issue_json();
        raw.as_object_mut().unwrap().remove("id");

        let err = normalize(&item(raw), RecordKind::Issue).unwrap_err();
        assert_eq!(err.field, "id");
        assert_eq!(err.identifier, "#1347");
    }

    #[test]
    fn test_issue_missing_user_is_malformed() {
        let mut raw = issue_json();
        raw["user"] = Value::Null;

        let err = normalize(&item(raw), RecordKind::Issue).unwrap_err();
        assert_eq!(err.field, "user.login");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw = item(issue_json());
        assert_eq!(
            normalize(&raw, RecordKind::Issue).unwrap(),
            normalize(&raw, RecordKind::Issue).unwrap()
        );
    }

    #[test]
    fn test_fields_align_with_columns() {
        let commit = normalize(&item(commit_json()), RecordKind::Commit).unwrap();
        let issue = normalize(&item(issue_json()), RecordKind::Issue).unwrap();
        assert_eq!(commit.fields().len(), COMMIT_COLUMNS.len());
        assert_eq!(issue.fields().len(), ISSUE_COLUMNS.len());
    }
}
