use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::model::{DataPoint, Payload};

pub const DEFAULT_API_BASE: &str = "https://www.beeminder.com/api/v1";

/// Everything that can go wrong talking to the service, collapsed to three
/// cases the sync engine can act on. None of these are fatal; the worst a
/// caller does is skip the rest of the cycle.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service could not be reached or the connection died mid-request.
    /// Worth retrying on the next cycle.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service rejected the credential. Retrying is pointless until the
    /// user installs a new token.
    #[error("invalid auth token")]
    Auth,
    /// The response body was not the JSON the API promises. The raw body is
    /// kept for diagnostics.
    #[error("malformed response: {reason}")]
    Parse { reason: String, body: String },
}

/// Renders hour values the way they are submitted to the service.
/// Locale-independent so a value round-trips identically on every machine.
pub fn format_hours(hours: f64) -> String {
    let rendered = format!("{hours:.6}");
    rendered
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

pub type HourFormatter = fn(f64) -> String;

/// Request/response surface of the goal service. The sync engine only knows
/// this trait, which keeps reconciliation testable without a server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApi {
    /// When the goal's current accounting window started. 0 when the goal
    /// has never been reset.
    async fn fetch_reset_date(&self, goal: &str) -> Result<i64, RemoteError>;

    /// Every data point on the goal, in ascending timestamp order.
    async fn fetch_all_data_points(&self, goal: &str) -> Result<Vec<DataPoint>, RemoteError>;

    async fn create_data_point(&self, goal: &str, point: &DataPoint) -> Result<(), RemoteError>;

    async fn update_data_point(
        &self,
        goal: &str,
        id: &str,
        point: &DataPoint,
    ) -> Result<(), RemoteError>;

    async fn delete_data_point(&self, goal: &str, id: &str) -> Result<(), RemoteError>;
}

/// Stateless REST client for the goal service. Holds no data between calls
/// beyond the connection pool.
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    auth_token: String,
    hour_format: HourFormatter,
}

impl RemoteClient {
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            auth_token: auth_token.into(),
            hour_format: format_hours,
        }
    }

    fn goal_url(&self, goal: &str) -> String {
        format!("{}/users/{}/goals/{goal}.json", self.base_url, self.user)
    }

    fn data_url(&self, goal: &str) -> String {
        format!(
            "{}/users/{}/goals/{goal}/datapoints.json",
            self.base_url, self.user
        )
    }

    fn point_url(&self, goal: &str, id: &str) -> String {
        format!(
            "{}/users/{}/goals/{goal}/datapoints/{id}.json",
            self.base_url, self.user
        )
    }

    fn check_auth(&self, status: StatusCode) -> Result<(), RemoteError> {
        if status == StatusCode::UNAUTHORIZED {
            error!(
                "Invalid auth token. Visit {}/auth_token.json to get a new one, \
                 then update your settings file.",
                self.base_url
            );
            return Err(RemoteError::Auth);
        }
        Ok(())
    }

    async fn get_payload<T: serde::de::DeserializeOwned + 'static>(
        &self,
        url: &str,
    ) -> Result<Vec<T>, RemoteError> {
        debug!("GET {url}");
        let response = self
            .http
            .get(url)
            .query(&[("auth_token", self.auth_token.as_str())])
            .send()
            .await?;
        self.check_auth(response.status())?;

        let body = response.text().await?;
        match serde_json::from_str::<Payload<T>>(&body) {
            Ok(payload) => Ok(payload.into_vec()),
            Err(e) => {
                warn!("Couldn't parse response from {url}: {e}. Body was {body:?}");
                Err(RemoteError::Parse {
                    reason: e.to_string(),
                    body,
                })
            }
        }
    }

    async fn run_mutation(&self, request: reqwest::RequestBuilder) -> Result<(), RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        self.check_auth(status)?;
        if status.is_success() {
            debug!("Response: {status}");
        } else {
            // The request executed and the service answered, so connectivity
            // is fine. Submission-level rejections are not worth aborting
            // the cycle over.
            warn!("Response: {status}");
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct GoalInfo {
    #[serde(default)]
    reset: Option<i64>,
}

#[async_trait]
impl RemoteApi for RemoteClient {
    async fn fetch_reset_date(&self, goal: &str) -> Result<i64, RemoteError> {
        let goals: Vec<GoalInfo> = self.get_payload(&self.goal_url(goal)).await?;
        Ok(goals.first().and_then(|v| v.reset).unwrap_or(0))
    }

    async fn fetch_all_data_points(&self, goal: &str) -> Result<Vec<DataPoint>, RemoteError> {
        let parsed: Vec<DataPoint> = self.get_payload(&self.data_url(goal)).await?;
        Ok(into_ascending(parsed))
    }

    async fn create_data_point(&self, goal: &str, point: &DataPoint) -> Result<(), RemoteError> {
        let url = self.data_url(goal);
        let value = (self.hour_format)(point.hours);
        debug!("POST {url} timestamp={} value={value}", point.timestamp);
        let form = [
            ("auth_token", self.auth_token.clone()),
            ("timestamp", point.timestamp.to_string()),
            ("value", value),
        ];
        self.run_mutation(self.http.post(&url).form(&form)).await
    }

    async fn update_data_point(
        &self,
        goal: &str,
        id: &str,
        point: &DataPoint,
    ) -> Result<(), RemoteError> {
        let url = self.point_url(goal, id);
        let value = (self.hour_format)(point.hours);
        debug!("PUT {url} timestamp={} value={value}", point.timestamp);
        let mut form = vec![
            ("auth_token", self.auth_token.clone()),
            ("timestamp", point.timestamp.to_string()),
            ("value", value),
        ];
        if !point.comment.is_empty() {
            form.push(("comment", point.comment.clone()));
        }
        self.run_mutation(self.http.put(&url).form(&form)).await
    }

    async fn delete_data_point(&self, goal: &str, id: &str) -> Result<(), RemoteError> {
        let url = self.point_url(goal, id);
        debug!("DELETE {url}");
        self.run_mutation(
            self.http
                .delete(&url)
                .query(&[("auth_token", self.auth_token.as_str())]),
        )
        .await
    }
}

/// The service doesn't guarantee ordered delivery. Every point is placed so
/// the accumulated sequence stays ascending, ties keeping arrival order.
fn into_ascending(points: Vec<DataPoint>) -> Vec<DataPoint> {
    let mut ordered: Vec<DataPoint> = Vec::with_capacity(points.len());
    for point in points {
        let at = ordered.partition_point(|v| v.timestamp <= point.timestamp);
        ordered.insert(at, point);
    }
    ordered
}
