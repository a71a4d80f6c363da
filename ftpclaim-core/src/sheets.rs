use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";
const VALUE_INPUT_OPTION: &str = "RAW";

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    InvalidBaseUrl(String),
    #[error("spreadsheet url is not valid: {0}")]
    InvalidSheetUrl(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Thin client over the values endpoints of the Sheets v4 REST API.
#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    base_url: Url,
    spreadsheet_id: String,
    token: String,
}

impl SheetsClient {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, SheetsError> {
        Self::with_base_url(DEFAULT_BASE_URL, spreadsheet_id, token)
    }

    pub fn with_base_url(
        base_url: &str,
        spreadsheet_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, SheetsError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SheetsError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            spreadsheet_id: spreadsheet_id.into(),
            token: token.into(),
        })
    }

    /// Builds a client for the spreadsheet a browser URL points at.
    pub fn from_sheet_url(sheet_url: &str, token: impl Into<String>) -> Result<Self, SheetsError> {
        Self::new(spreadsheet_id_from_url(sheet_url)?, token)
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    /// Returns a copy of this client that authenticates with `token`.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            spreadsheet_id: self.spreadsheet_id.clone(),
            token: token.into(),
        }
    }

    pub async fn get_values(&self, range: &str) -> Result<ValueRange, SheetsError> {
        let url = self.endpoint(&["values", range])?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn update_values(
        &self,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<UpdateValuesResponse, SheetsError> {
        let mut url = self.endpoint(&["values", range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", VALUE_INPUT_OPTION);
        let body = ValueRange {
            range: Some(range.to_string()),
            major_dimension: Some("ROWS".to_string()),
            values: values.to_vec(),
        };
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn append_values(
        &self,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<AppendValuesResponse, SheetsError> {
        let mut url = self.endpoint(&["values", &format!("{range}:append")])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", VALUE_INPUT_OPTION)
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = ValueRange {
            range: Some(range.to_string()),
            major_dimension: Some("ROWS".to_string()),
            values: values.to_vec(),
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Writes several ranges in a single request.
    pub async fn batch_update_values(
        &self,
        data: &[ValueRange],
    ) -> Result<BatchUpdateValuesResponse, SheetsError> {
        let url = self.endpoint(&["values:batchUpdate"])?;
        let body = BatchUpdateValuesRequest {
            value_input_option: VALUE_INPUT_OPTION,
            data,
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url, SheetsError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SheetsError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SheetsError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SheetsError::Api { status, body })
        }
    }
}

/// Extracts the spreadsheet id from a `https://docs.google.com/spreadsheets/d/<id>/...` URL.
pub fn spreadsheet_id_from_url(sheet_url: &str) -> Result<String, SheetsError> {
    let id = sheet_url
        .split("/d/")
        .nth(1)
        .and_then(|rest| rest.split(['/', '?', '#']).next())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SheetsError::InvalidSheetUrl(sheet_url.to_string()))?;
    Ok(id.to_string())
}

impl SheetsError {
    /// The API refused the bearer token; a fresh token may succeed.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            SheetsError::Api { status, .. }
                if matches!(*status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_dimension: Option<String>,
    #[serde(default)]
    pub values: Vec<Vec<String>>,
}

impl ValueRange {
    pub fn rows(range: impl Into<String>, values: Vec<Vec<String>>) -> Self {
        Self {
            range: Some(range.into()),
            major_dimension: Some("ROWS".to_string()),
            values,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateValuesRequest<'a> {
    value_input_option: &'a str,
    data: &'a [ValueRange],
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateValuesResponse {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub updated_range: Option<String>,
    #[serde(default)]
    pub updated_rows: u32,
    #[serde(default)]
    pub updated_cells: u32,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendValuesResponse {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub table_range: Option<String>,
    #[serde(default)]
    pub updates: Option<UpdateValuesResponse>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateValuesResponse {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub total_updated_rows: u32,
    #[serde(default)]
    pub total_updated_cells: u32,
}
