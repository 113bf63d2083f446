//! REST client for the catalog and enrollment services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, Response,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use super::{CourseBackend, RemoteCompletion, RemoteEnrollment, RemoteProgress};
use crate::{
    config::ApiConfig,
    course::{Course, CourseId, EnrollmentId, LearnerId, Lesson, LessonId},
    error::{Error, Result},
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressUpdate {
    progress_percentage: u8,
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    /// `token` is the learner's credential, sent as a bearer header on every request.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::InvariantViolation(format!("invalid api token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::NetworkFailure(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            config.token.as_deref(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_err(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::NetworkFailure(e.to_string())
        }
    }

    async fn read<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let response = response.error_for_status().map_err(|e| self.map_err(e))?;
        response.json::<T>().await.map_err(|e| self.map_err(e))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!("GET {}", path);
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.read(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!("POST {}", path);
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        self.read(response).await
    }
}

#[async_trait]
impl CourseBackend for HttpBackend {
    async fn course(&self, course_id: CourseId) -> Result<Course> {
        self.get(&format!("/courses/{course_id}")).await
    }

    async fn lessons(&self, course_id: CourseId) -> Result<Vec<Lesson>> {
        self.get(&format!("/courses/{course_id}/lessons")).await
    }

    async fn enrollment(
        &self,
        course_id: CourseId,
        learner_id: LearnerId,
    ) -> Result<RemoteEnrollment> {
        self.get(&format!("/courses/{course_id}/enrollments/{learner_id}"))
            .await
    }

    async fn completed_lessons(&self, enrollment_id: EnrollmentId) -> Result<Vec<LessonId>> {
        self.get(&format!("/enrollments/{enrollment_id}/completed-lessons"))
            .await
    }

    async fn update_progress(
        &self,
        enrollment_id: EnrollmentId,
        percentage: u8,
    ) -> Result<RemoteProgress> {
        let body = ProgressUpdate {
            progress_percentage: percentage,
        };
        self.post(&format!("/enrollments/{enrollment_id}/progress"), &body)
            .await
    }

    async fn complete_enrollment(&self, enrollment_id: EnrollmentId) -> Result<RemoteCompletion> {
        self.post(&format!("/enrollments/{enrollment_id}/complete"), &serde_json::json!({}))
            .await
    }
}
