use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::classify::find_accession;
use crate::domain::AccessionNumber;
use crate::error::EtlError;

#[derive(Debug, Clone, Default)]
pub struct ExcludedSet {
    inner: HashSet<AccessionNumber>,
}

impl ExcludedSet {
    pub fn contains(&self, accession: &AccessionNumber) -> bool {
        self.inner.contains(accession)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl FromIterator<AccessionNumber> for ExcludedSet {
    fn from_iter<T: IntoIterator<Item = AccessionNumber>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

pub trait MetadataClient: Send + Sync {
    fn query(&self, query: &str) -> Result<Value, EtlError>;
}

#[derive(Clone)]
pub struct GraphHttpClient {
    client: Client,
    endpoint: String,
}

impl GraphHttpClient {
    pub fn new(commons_url: &str, access_token: Option<&str>) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ncbi-shard/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::QueryHttp(err.to_string()))?,
        );
        if let Some(token) = access_token.map(str::trim).filter(|token| !token.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|err| EtlError::QueryHttp(err.to_string()))?,
            );
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EtlError::QueryHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/api/v0/submission/graphql",
                commons_url.trim_end_matches('/')
            ),
        })
    }
}

impl MetadataClient for GraphHttpClient {
    fn query(&self, query: &str) -> Result<Value, EtlError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query }))
            .send()
            .map_err(|err| EtlError::QueryHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "metadata query failed".to_string());
            return Err(EtlError::Query { status, message });
        }
        let mut body: Value = response
            .json()
            .map_err(|err| EtlError::QueryHttp(err.to_string()))?;
        if let Some(errors) = body.get("errors").filter(|errors| !errors.is_null()) {
            return Err(EtlError::Query {
                status: 200,
                message: errors.to_string(),
            });
        }
        Ok(body
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

pub fn node_query(node_name: &str) -> Result<String, EtlError> {
    let mut chars = node_name.chars();
    let valid = chars
        .next()
        .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
        .unwrap_or(false)
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if !valid {
        return Err(EtlError::InvalidNodeName(node_name.to_string()));
    }
    Ok(format!("{{ {node_name} (first:0) {{ submitter_id }} }}"))
}

pub fn fetch_excluded(
    client: &dyn MetadataClient,
    node_name: &str,
) -> Result<ExcludedSet, EtlError> {
    let query = node_query(node_name)?;
    let data = client.query(&query)?;
    let records = data
        .get(node_name)
        .and_then(Value::as_array)
        .ok_or_else(|| EtlError::QueryShape {
            node: node_name.to_string(),
            message: "missing record list".to_string(),
        })?;

    let mut excluded = HashSet::with_capacity(records.len());
    for record in records {
        let Some(submitter_id) = record.get("submitter_id").and_then(Value::as_str) else {
            debug!(node = node_name, "record without submitter_id");
            continue;
        };
        match find_accession(submitter_id) {
            Some(accession) => {
                excluded.insert(accession);
            }
            None => debug!(node = node_name, submitter_id, "no accession in submitter_id"),
        }
    }
    info!(node = node_name, count = excluded.len(), "loaded existing accession numbers");
    Ok(ExcludedSet { inner: excluded })
}
