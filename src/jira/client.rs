use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::date_util::format_remote_instant;
use crate::error::{Error, Result};
use crate::jira::config::{JiraAuth, JiraConfig};
use crate::jira::rate_limiter::RequestPacer;
use crate::jira::wire::{
    decode_worklog, id_to_string, AdfNode, CreateWorklogRequest, CreatedWorklog, SearchRequest,
    SearchResponse, WorklogListResponse,
};
use crate::jira::{FetchedWorklogs, IssuePage, IssueQuery, WorklogRemote};
use crate::model::RemoteWorklogDraft;

/// HTTP client for the Jira Cloud REST API.
#[derive(Clone)]
pub struct JiraClient {
    http: HttpClient,
    config: JiraConfig,
    pacer: RequestPacer,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        let pacer = RequestPacer::new(config.cooldown);
        Ok(Self { http, config, pacer })
    }

    /// API root plus `segments`, each percent-encoded as one path segment.
    fn url_for(&self, segments: &[&str]) -> Result<Url> {
        let root = self.config.api_root();
        let mut url =
            Url::parse(&root).map_err(|e| Error::Config(format!("invalid Jira URL {root}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("invalid Jira URL {root}")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let builder = self
            .http
            .request(method, self.url_for(segments)?)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, self.config.user_agent.as_str());
        Ok(match &self.config.auth {
            JiraAuth::Basic { email, token } => builder.basic_auth(email, Some(token)),
            JiraAuth::Bearer { token } => builder.bearer_auth(token),
        })
    }

    async fn get_json<T>(&self, segments: &[&str]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = self.request(Method::GET, segments)?;
        self.pacer.wait().await;
        let response = request.send().await?;
        Self::parse_json(response).await
    }

    async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, segments)?.json(body);
        self.pacer.wait().await;
        let response = request.send().await?;
        Self::parse_json(response).await
    }

    async fn parse_json<T>(response: Response) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::RemoteTransport(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::RemoteApi {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(Error::from)
    }
}

#[async_trait]
impl WorklogRemote for JiraClient {
    async fn fetch_worklogs(&self, issue_key: &str) -> Result<FetchedWorklogs> {
        let response: WorklogListResponse =
            self.get_json(&["issue", issue_key, "worklog"]).await?;

        let mut fetched = FetchedWorklogs::default();
        for raw in response.worklogs {
            match decode_worklog(raw, issue_key) {
                Ok(worklog) => fetched.worklogs.push(worklog),
                Err(bad) => {
                    log::warn!(
                        "Skipping malformed worklog {} on {issue_key}: {}",
                        bad.worklog_id.as_deref().unwrap_or("<no id>"),
                        bad.error
                    );
                    fetched.malformed.push(bad);
                }
            }
        }
        log::debug!(
            "Fetched {} worklogs for {issue_key} ({} malformed)",
            fetched.worklogs.len(),
            fetched.malformed.len()
        );
        Ok(fetched)
    }

    async fn search_issues_page(
        &self,
        query: &IssueQuery,
        page_token: Option<&str>,
    ) -> Result<IssuePage> {
        let body = SearchRequest {
            jql: &query.jql,
            max_results: query.page_size,
            fields: ["key"],
            next_page_token: page_token,
        };
        let response: SearchResponse = self.post_json(&["search", "jql"], &body).await?;
        Ok(IssuePage {
            issue_keys: response.issues.into_iter().map(|i| i.key).collect(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn create_worklog(&self, draft: &RemoteWorklogDraft) -> Result<String> {
        let body = CreateWorklogRequest {
            time_spent_seconds: draft.duration_seconds,
            started: format_remote_instant(&draft.started),
            comment: AdfNode::doc_from_text(&draft.comment),
        };
        let created: CreatedWorklog = self
            .post_json(&["issue", draft.issue_key.as_str(), "worklog"], &body)
            .await?;
        id_to_string(&created.id).ok_or_else(|| {
            Error::Serialization(format!("created worklog on {} has no id", draft.issue_key))
        })
    }
}
