//! HTTP implementation of the provider boundary.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::{
    Credentials, LoginForm, ProviderAccount, ProviderClient, ProviderError, RemoteAccount,
    RemoteTransaction, Session,
};

const RECORD_NOT_FOUND: &str = "RECORD_NOT_FOUND";

/// JSON-over-HTTP client for the aggregation provider's API.
pub struct HttpProviderClient {
    base_url: String,
    client: Client,
}

impl HttpProviderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    /// Override the API base URL (useful for tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request<T: for<'de> Deserialize<'de>, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| ProviderError::Transient {
                code: "NETWORK".to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|err| ProviderError::Transient {
                code: "NETWORK".to_string(),
                message: err.to_string(),
            })?;

        if !status.is_success() {
            return Err(classify_failure(status, &body_text));
        }

        serde_json::from_str(&body_text).map_err(|err| ProviderError::Other {
            code: "MALFORMED_RESPONSE".to_string(),
            message: format!("failed to parse provider response from {path}: {err}"),
        })
    }
}

/// Map a failed HTTP response onto the error taxonomy using the provider's
/// machine-readable code; unrecognized codes become [`ProviderError::Other`].
fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error_code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or(ErrorBody {
        error_code: None,
        message: None,
    });
    let code = parsed
        .error_code
        .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));
    let message = parsed.message.unwrap_or_else(|| body.to_string());

    match code.as_str() {
        "INVALID_LOGIN" | "CREDENTIALS_REJECTED" => ProviderError::Auth { code },
        c if c.starts_with("MFA_") => ProviderError::Mfa { code },
        "RATE_LIMITED" => ProviderError::Transient { code, message },
        _ if status.is_server_error() => ProviderError::Transient { code, message },
        _ => ProviderError::Other { code, message },
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn login(&self, credentials: &Credentials) -> Result<Session, ProviderError> {
        #[derive(Serialize)]
        struct Request<'a> {
            username: &'a str,
            password: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            token: String,
            expires_in_secs: i64,
        }

        let response: Response = self
            .request(
                "/v1/session",
                &Request {
                    username: &credentials.username,
                    password: credentials.password.expose_secret(),
                },
            )
            .await?;

        Ok(Session {
            token: response.token,
            expires_at: Utc::now() + Duration::seconds(response.expires_in_secs),
        })
    }

    async fn session_active(&self, session: &Session) -> Result<bool, ProviderError> {
        #[derive(Serialize)]
        struct Request<'a> {
            token: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            active: bool,
        }

        let response: Response = self
            .request(
                "/v1/session/verify",
                &Request {
                    token: &session.token,
                },
            )
            .await?;
        Ok(response.active)
    }

    async fn initiate_link(
        &self,
        session: &Session,
        provider_id: &str,
        credentials: &Credentials,
    ) -> Result<ProviderAccount, ProviderError> {
        #[derive(Serialize)]
        struct Request<'a> {
            token: &'a str,
            provider_id: &'a str,
            username: &'a str,
            password: &'a str,
        }

        self.request(
            "/v1/provider-accounts",
            &Request {
                token: &session.token,
                provider_id,
                username: &credentials.username,
                password: credentials.password.expose_secret(),
            },
        )
        .await
    }

    async fn fetch_provider_account(
        &self,
        session: &Session,
        provider_account_id: &str,
    ) -> Result<Option<ProviderAccount>, ProviderError> {
        #[derive(Serialize)]
        struct Request<'a> {
            token: &'a str,
            id: &'a str,
        }

        let result: Result<ProviderAccount, ProviderError> = self
            .request(
                "/v1/provider-accounts/get",
                &Request {
                    token: &session.token,
                    id: provider_account_id,
                },
            )
            .await;

        match result {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) if err.code() == RECORD_NOT_FOUND => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn submit_login_form(
        &self,
        session: &Session,
        provider_account_id: &str,
        form: &LoginForm,
    ) -> Result<(), ProviderError> {
        #[derive(Serialize)]
        struct Request<'a> {
            token: &'a str,
            id: &'a str,
            form: &'a LoginForm,
        }

        #[derive(Deserialize)]
        struct Response {}

        let _: Response = self
            .request(
                "/v1/provider-accounts/login-form",
                &Request {
                    token: &session.token,
                    id: provider_account_id,
                    form,
                },
            )
            .await?;
        Ok(())
    }

    async fn fetch_accounts(
        &self,
        session: &Session,
        provider_account_id: &str,
    ) -> Result<Vec<RemoteAccount>, ProviderError> {
        #[derive(Serialize)]
        struct Request<'a> {
            token: &'a str,
            provider_account_id: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            accounts: Vec<RemoteAccount>,
        }

        let response: Response = self
            .request(
                "/v1/accounts",
                &Request {
                    token: &session.token,
                    provider_account_id,
                },
            )
            .await?;
        Ok(response.accounts)
    }

    async fn fetch_transactions(
        &self,
        session: &Session,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RemoteTransaction>, ProviderError> {
        #[derive(Serialize)]
        struct Request<'a> {
            token: &'a str,
            account_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            since: Option<NaiveDate>,
        }

        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            transactions: Vec<RemoteTransaction>,
        }

        let response: Response = self
            .request(
                "/v1/transactions",
                &Request {
                    token: &session.token,
                    account_id,
                    since,
                },
            )
            .await?;
        Ok(response.transactions)
    }

    async fn delete_provider_account(
        &self,
        session: &Session,
        provider_account_id: &str,
    ) -> Result<(), ProviderError> {
        #[derive(Serialize)]
        struct Request<'a> {
            token: &'a str,
            id: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {}

        let _: Response = self
            .request(
                "/v1/provider-accounts/delete",
                &Request {
                    token: &session.token,
                    id: provider_account_id,
                },
            )
            .await?;
        Ok(())
    }
}
