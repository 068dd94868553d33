use anyhow::{Context, Result, bail};
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::table::{Record, date_key};

/// Query selector for one (metric, asset) time series.
#[derive(Debug, Clone)]
pub struct MetricQuery<'a> {
    pub metric: &'a str,
    pub slug: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub interval: &'a str,
}

/// Raw point as returned by `timeseriesData`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DataPoint {
    pub datetime: String,
    #[serde(default)]
    pub value: Value,
}

impl DataPoint {
    /// Value as it is written into the table file; `null` becomes an empty field.
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn to_record(&self) -> Result<Record> {
        Ok(Record::new(date_key(&self.datetime)?, self.value_text()))
    }
}

/// Anything that can answer a [`MetricQuery`].
#[allow(async_fn_in_trait)]
pub trait MetricSource {
    async fn timeseries(&self, query: &MetricQuery<'_>) -> Result<Vec<DataPoint>>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseData {
    get_metric: Option<GetMetric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetMetric {
    timeseries_data: Vec<DataPoint>,
}

/// GraphQL document for a daily `getMetric` time series.
pub fn request_body(q: &MetricQuery<'_>) -> String {
    format!(
        r#"
{{ getMetric(metric: "{metric}")
  {{
    timeseriesData(
      slug: "{slug}"
      from: "{from}"
      to: "{to}"
      interval: "{interval}"
    )
    {{
      datetime
      value
    }}
  }}
}}
"#,
        metric = q.metric,
        slug = q.slug,
        from = q.from,
        to = q.to,
        interval = q.interval,
    )
}

/// Pull `data.getMetric.timeseriesData` out of a response body.
pub fn parse_response(body: &str) -> Result<Vec<DataPoint>> {
    let resp: GraphQlResponse = serde_json::from_str(body).context("decode GraphQL response")?;
    if !resp.errors.is_empty() {
        let msgs: Vec<&str> = resp.errors.iter().map(|e| e.message.as_str()).collect();
        bail!("GraphQL error: {}", msgs.join("; "));
    }
    match resp.data.and_then(|d| d.get_metric) {
        Some(m) => Ok(m.timeseries_data),
        None => bail!("response has no data.getMetric"),
    }
}

/// Santiment GraphQL API client.
#[derive(Debug, Clone)]
pub struct SantimentClient {
    client: Client,
    endpoint: reqwest::Url,
}

impl SantimentClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/graphql"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .user_agent("santiment_seeds/0.1 (rust)")
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;
        let endpoint = reqwest::Url::parse(endpoint)
            .with_context(|| format!("invalid endpoint {endpoint}"))?;
        Ok(Self { client, endpoint })
    }
}

impl MetricSource for SantimentClient {
    async fn timeseries(&self, query: &MetricQuery<'_>) -> Result<Vec<DataPoint>> {
        debug!("POST {} metric={} slug={}", self.endpoint, query.metric, query.slug);
        let resp = self
            .client
            .post(self.endpoint.clone())
            .body(request_body(query))
            .send()
            .await?;
        let status = resp.status();
        let txt = resp.text().await?;
        if !status.is_success() {
            bail!("HTTP {}; body: {}", status, txt);
        }
        parse_response(&txt)
            .with_context(|| format!("{} for {}", query.metric, query.slug))
    }
}
