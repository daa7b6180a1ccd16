//! JSON shapes exchanged with the Jira REST API (v3), and their decoding
//! into domain types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::date_util::parse_remote_instant;
use crate::error::{Error, Result};
use crate::jira::MalformedWorklog;
use crate::model::{Block, Comment, Document, Inline, RemoteWorklog, WorklogAuthor};

/// Worklogs stay raw here so one bad record can't sink the whole list.
#[derive(Debug, Deserialize)]
pub struct WorklogListResponse {
    #[serde(default)]
    pub worklogs: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireWorklog {
    /// Jira sends a string, but some proxies and older servers send a number.
    pub id: Value,
    #[serde(default)]
    pub author: Option<WireAuthor>,
    #[serde(default)]
    pub comment: Option<WireComment>,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub time_spent_seconds: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAuthor {
    pub account_id: Option<String>,
    pub display_name: Option<String>,
    pub email_address: Option<String>,
}

/// Comment body: a plain string (API v2 style) or an ADF document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireComment {
    Text(String),
    Doc(AdfNode),
}

/// One node of an Atlassian Document Format tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdfNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<AdfNode>,
}

impl AdfNode {
    /// A version-1 document with one paragraph holding `text`.
    pub fn doc_from_text(text: &str) -> Self {
        AdfNode {
            node_type: "doc".into(),
            version: Some(1),
            text: None,
            content: vec![AdfNode {
                node_type: "paragraph".into(),
                version: None,
                text: None,
                content: vec![AdfNode {
                    node_type: "text".into(),
                    version: None,
                    text: Some(text.to_string()),
                    content: Vec::new(),
                }],
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest<'a> {
    pub jql: &'a str,
    pub max_results: u32,
    pub fields: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub issues: Vec<IssueRef>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueRef {
    pub key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorklogRequest {
    pub time_spent_seconds: i64,
    pub started: String,
    pub comment: AdfNode,
}

#[derive(Debug, Deserialize)]
pub struct CreatedWorklog {
    pub id: Value,
}

/// Render a JSON id (string or number) as a string.
pub fn id_to_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode one element of a worklog list. On failure the id is reported
/// alongside the error whenever the record carries a readable one.
pub fn decode_worklog(
    raw: Value,
    issue_key: &str,
) -> std::result::Result<RemoteWorklog, MalformedWorklog> {
    let worklog_id = raw.get("id").and_then(id_to_string);
    serde_json::from_value::<WireWorklog>(raw)
        .map_err(Error::from)
        .and_then(|wire| wire.into_remote(issue_key))
        .map_err(|error| MalformedWorklog { worklog_id, error })
}

impl WireWorklog {
    /// Decode into a domain worklog attached to `issue_key`.
    pub fn into_remote(self, issue_key: &str) -> Result<RemoteWorklog> {
        let id = id_to_string(&self.id)
            .ok_or_else(|| Error::Serialization(format!("worklog on {issue_key} has no id")))?;
        let started_raw = self.started.unwrap_or_default();
        let started = parse_remote_instant(&started_raw)?;

        Ok(RemoteWorklog {
            id,
            issue_key: issue_key.to_string(),
            duration_seconds: self.time_spent_seconds,
            started,
            comment: self.comment.map(WireComment::into_comment).unwrap_or_default(),
            author: self.author.map(|a| WorklogAuthor {
                account_id: a.account_id,
                display_name: a.display_name,
                email_address: a.email_address,
            }),
        })
    }
}

impl WireComment {
    pub fn into_comment(self) -> Comment {
        match self {
            WireComment::Text(s) => Comment::Plain(s),
            WireComment::Doc(node) => Comment::Document(adf_to_document(&node)),
        }
    }
}

/// Top-level nodes become blocks; every text node under a block, however
/// deeply nested, becomes one inline run of that block.
pub fn adf_to_document(doc: &AdfNode) -> Document {
    let blocks = doc
        .content
        .iter()
        .map(|node| {
            let mut inlines = Vec::new();
            collect_inlines(node, &mut inlines);
            if node.node_type == "paragraph" {
                Block::Paragraph(inlines)
            } else {
                Block::Other {
                    kind: node.node_type.clone(),
                    inlines,
                }
            }
        })
        .collect();
    Document { blocks }
}

fn collect_inlines(node: &AdfNode, out: &mut Vec<Inline>) {
    for child in &node.content {
        match (child.node_type.as_str(), &child.text) {
            ("text", Some(text)) => out.push(Inline::Text(text.clone())),
            (_, _) if !child.content.is_empty() => collect_inlines(child, out),
            (kind, _) => out.push(Inline::Other(kind.to_string())),
        }
    }
}
