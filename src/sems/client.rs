use log::{debug, error, info, warn};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::structs::{ApiEnvelope, ChargingRequest, LoginRequest, LoginResponse, SetChargeModeRequest, StatusRequest, WallboxData};

const DEFAULT_BASE_URL: &str = "https://www.semsportal.com";

const LOGIN_PATH: &str = "/api/v3/Common/CrossLogin";
const WALLBOX_PATH_V3: &str = "/api/v3/EvCharger/GetCurrentChargeinfo";
const WALLBOX_PATH_V4: &str = "/api/v4/EvCharger/GetEvChargerMoreView";
const SET_CHARGE_MODE_PATH: &str = "/api/v3/EvCharger/SetChargeMode";
const POWER_CONTROL_PATH: &str = "/api/v3/EvCharger/Charging";

/* v4 has a nicer payload but is not reliable on all accounts yet, default to v3 */
const USE_V4_STATUS: bool = false;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/* the portal refuses logins without this bootstrap token header */
const PRE_LOGIN_TOKEN: &str = "{\"version\":\"\",\"client\":\"semsPlusAndroid\",\"language\":\"en\"}";

#[derive(Error, Debug)]
pub enum SemsError {
    #[error("HTTP error talking to the portal: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Login rejected by the portal: {0}")]
    Login(String),
    #[error("Portal reported an error: {0}")]
    Api(String),
    #[error("Maximum token fetch tries reached")]
    OutOfRetries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeControl {
    Start,
    Stop,
}

impl ChargeControl {
    pub fn code(&self) -> u8 {
        match self {
            ChargeControl::Start => 1,
            ChargeControl::Stop => 2,
        }
    }
}

/// Client for the SEMS portal wallbox endpoints. Caches the login token and
/// renews it once per call when the portal reports it expired.
pub struct SemsClient {
    http: reqwest::Client,
    base_url: String,
    account: String,
    password: String,
    token: Option<Value>,
    prefer_v4: bool,
}

impl SemsClient {
    pub fn new(account: String, password: String) -> Result<Self, SemsError> {
        return Self::with_base_url(DEFAULT_BASE_URL, account, password);
    }

    pub fn with_base_url(base_url: impl Into<String>, account: String, password: String) -> Result<Self, SemsError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        return Ok(SemsClient {
            http,
            base_url: base_url.into(),
            account,
            password,
            token: None,
            prefer_v4: USE_V4_STATUS,
        });
    }

    pub fn with_v4_status(mut self, enabled: bool) -> Self {
        self.prefer_v4 = enabled;
        return self;
    }

    async fn fetch_login_token(&self) -> Result<Value, SemsError> {
        debug!("Getting API token from the portal");

        let body = LoginRequest {
            account: self.account.clone(),
            pwd: self.password.clone(),
        };

        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        let response = self.http.post(&url)
            .header("Accept", "application/json")
            .header("token", PRE_LOGIN_TOKEN)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let login: LoginResponse = response.json().await?;

        if login.has_error || !matches!(login.code, Some(0) | None) {
            let msg = login.msg.unwrap_or_default();
            error!("SEMS login returned error: {msg}");
            return Err(SemsError::Login(msg));
        }

        let mut token = match login.data {
            Some(data) => data,
            None => { return Err(SemsError::Login("login response carried no token data".to_string())); }
        };

        /* the api field rides along next to data but belongs into the token */
        if let Some(obj) = token.as_object_mut() {
            obj.insert("api".to_string(), login.api.unwrap_or(Value::Null));
        }

        debug!("API token received");
        return Ok(token);
    }

    async fn ensure_token(&mut self, renew: bool) -> Result<(), SemsError> {
        if self.token.is_none() || renew {
            debug!("API token not set or renewal requested, fetching");
            let token = self.fetch_login_token().await?;
            self.token = Some(token);
        }
        return Ok(());
    }

    /// The token goes back to the server exactly as it came from login
    fn token_header(&self) -> String {
        match self.token.as_ref() {
            Some(token) => serde_json::to_string(token).unwrap(),
            None => PRE_LOGIN_TOKEN.to_string(),
        }
    }

    async fn post_api<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response, SemsError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url)
            .header("Accept", "application/json")
            .header("token", self.token_header())
            .json(body)
            .send()
            .await?;
        return Ok(response);
    }

    async fn fetch_status(&self, sn: &str) -> Result<ApiEnvelope, SemsError> {
        let body = StatusRequest { sn: sn.to_string() };
        let path = if self.prefer_v4 { WALLBOX_PATH_V4 } else { WALLBOX_PATH_V3 };

        debug!("Making wallbox status call, path={path}, sn={sn}");
        let response = self.post_api(path, &body).await?;

        /* v4 is not rolled out for every account, a 404 there means v3 it is */
        if self.prefer_v4 && response.status() == StatusCode::NOT_FOUND {
            warn!("v4 status endpoint returned 404, falling back to v3 for sn {sn}");
            let response = self.post_api(WALLBOX_PATH_V3, &body).await?;
            return Ok(response.error_for_status()?.json::<ApiEnvelope>().await?);
        }

        let envelope = response.error_for_status()?.json::<ApiEnvelope>().await?;

        /* v4 sometimes reports success ("成功") with an empty data block */
        if self.prefer_v4 && envelope.data.is_none() && envelope.message().contains("成功") {
            warn!("v4 status endpoint returned success without data, falling back to v3 for sn {sn}");
            let response = self.post_api(WALLBOX_PATH_V3, &body).await?;
            return Ok(response.error_for_status()?.json::<ApiEnvelope>().await?);
        }

        return Ok(envelope);
    }

    /// Fetch the current wallbox status from the portal
    pub async fn get_data(&mut self, sn: &str) -> Result<WallboxData, SemsError> {
        let mut token_retries = 1;
        let mut renew = false;

        loop {
            self.ensure_token(renew).await?;

            let envelope = self.fetch_status(sn).await?;

            if envelope.is_authorization_expired() {
                if token_retries <= 0 {
                    info!("Maximum token fetch tries reached, aborting for now");
                    return Err(SemsError::OutOfRetries);
                }
                debug!("Authorization expired ({}), retrying with a fresh token", envelope.message());
                self.token = None;
                renew = true;
                token_retries -= 1;
                continue;
            }

            match envelope.data {
                Some(data) => {
                    return WallboxData::from_value(data)
                        .map_err(|e| SemsError::Api(format!("malformed status payload: {e}")));
                }
                None => {
                    error!("Unable to fetch data from SEMS, message: {}", envelope.message());
                    return Err(SemsError::Api(envelope.message()));
                }
            }
        }
    }

    /// Start or stop charging
    pub async fn change_status(&mut self, sn: &str, control: ChargeControl) -> Result<(), SemsError> {
        debug!("Sending power control command for wallbox sn {sn}: {control:?}");

        let body = ChargingRequest {
            sn: sn.to_string(),
            status: control.code().to_string(),
        };
        return self.command_call(POWER_CONTROL_PATH, &body).await;
    }

    /// Set the charge mode and optionally the charge power setpoint
    pub async fn set_charge_mode(&mut self, sn: &str, mode: i64, charge_power: Option<f64>) -> Result<(), SemsError> {
        debug!("Sending SetChargeMode command for wallbox sn {sn}: mode={mode}, power={charge_power:?}");

        let body = SetChargeModeRequest {
            sn: sn.to_string(),
            mode,
            charge_power,
        };
        return self.command_call(SET_CHARGE_MODE_PATH, &body).await;
    }

    async fn command_call<T: Serialize>(&mut self, path: &str, body: &T) -> Result<(), SemsError> {
        let mut token_retries = 1;
        let mut renew = false;

        loop {
            self.ensure_token(renew).await?;

            let response = self.post_api(path, body).await?;
            let status = response.status();
            let text = response.text().await?;

            /* command responses are not always JSON, only look if they are */
            if let Ok(envelope) = serde_json::from_str::<ApiEnvelope>(&text) {
                if envelope.is_authorization_expired() {
                    if token_retries <= 0 {
                        info!("Maximum token fetch tries reached for command, aborting");
                        return Err(SemsError::OutOfRetries);
                    }
                    debug!("Command hit an expired authorization, retrying once with a fresh token");
                    self.token = None;
                    renew = true;
                    token_retries -= 1;
                    continue;
                }
            }

            if !status.is_success() {
                warn!("Command not successful (HTTP {status}), response: {text}");
                return Err(SemsError::Api(format!("command not successful (HTTP {status})")));
            }

            return Ok(());
        }
    }

    /// Force a token renewal to check the credentials
    pub async fn test_authentication(&mut self) -> bool {
        match self.ensure_token(true).await {
            Ok(_) => { return true; }
            Err(e) => {
                error!("SEMS authentication check failed: {e}");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn login_body() -> String {
        return json!({
            "hasError": false,
            "code": 0,
            "msg": "success",
            "data": {"uid": "u1", "token": "tok-1", "timestamp": 1700000000},
            "api": "https://eu.semsportal.com/api/"
        }).to_string();
    }

    fn status_body() -> String {
        return json!({
            "code": 0,
            "msg": "success",
            "data": {
                "sn": "5010KET1234W0001",
                "model": "HCA-11kW",
                "fireware": "03.100",
                "status": "EVDetail_Status_Title_Charging",
                "power": "7.36",
                "chargeEnergy": "184.2",
                "chargeMode": 0,
                "max_charge_power": 11,
                "set_charge_power": 7.4
            }
        }).to_string();
    }

    #[tokio::test]
    async fn test_login_and_get_data() {
        let mut server = Server::new_async().await;

        let login_mock = server.mock("POST", LOGIN_PATH)
            .match_header("token", PRE_LOGIN_TOKEN)
            .match_body(Matcher::Json(json!({"account": "user", "pwd": "pw"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .create_async()
            .await;

        let status_mock = server.mock("POST", WALLBOX_PATH_V3)
            .match_header("token", Matcher::Regex("tok-1".to_string()))
            .match_body(Matcher::Json(json!({"sn": "5010KET1234W0001"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(status_body())
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string()).unwrap();
        let data = client.get_data("5010KET1234W0001").await.unwrap();

        assert_eq!(data.sn, "5010KET1234W0001");
        assert_eq!(data.firmware, "03.100");
        login_mock.assert_async().await;
        status_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_error_is_reported() {
        let mut server = Server::new_async().await;

        let login_mock = server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({
                "hasError": true,
                "code": 100005,
                "msg": "Email or password error",
                "data": null
            }).to_string())
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "wrong".to_string()).unwrap();
        let result = client.get_data("sn1").await;

        assert!(matches!(result, Err(SemsError::Login(_))));
        login_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_authorization_retries_login_once() {
        let mut server = Server::new_async().await;

        /* the status endpoint keeps claiming the token expired, so the client
           must log in exactly twice (initial + one renewal) and then give up */
        let login_mock = server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .expect(2)
            .create_async()
            .await;

        let status_mock = server.mock("POST", WALLBOX_PATH_V3)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({
                "code": 100002,
                "msg": "The authorization has expired, please log in again",
                "data": null
            }).to_string())
            .expect(2)
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string()).unwrap();
        let result = client.get_data("sn1").await;

        assert!(matches!(result, Err(SemsError::OutOfRetries)));
        login_mock.assert_async().await;
        status_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_without_data() {
        let mut server = Server::new_async().await;

        server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .create_async()
            .await;

        server.mock("POST", WALLBOX_PATH_V3)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({
                "code": 100001,
                "msg": "device offline",
                "data": null
            }).to_string())
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string()).unwrap();
        let result = client.get_data("sn1").await;

        assert!(matches!(result, Err(SemsError::Api(_))));
    }

    #[tokio::test]
    async fn test_v4_not_found_falls_back_to_v3() {
        let mut server = Server::new_async().await;

        server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .create_async()
            .await;

        let v4_mock = server.mock("POST", WALLBOX_PATH_V4)
            .with_status(404)
            .create_async()
            .await;

        let v3_mock = server.mock("POST", WALLBOX_PATH_V3)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(status_body())
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string())
            .unwrap()
            .with_v4_status(true);
        let data = client.get_data("5010KET1234W0001").await.unwrap();

        assert_eq!(data.model, "HCA-11kW");
        v4_mock.assert_async().await;
        v3_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_v4_success_without_data_falls_back_to_v3() {
        let mut server = Server::new_async().await;

        server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .create_async()
            .await;

        let v4_mock = server.mock("POST", WALLBOX_PATH_V4)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"code": 0, "msg": "操作成功", "data": null}).to_string())
            .create_async()
            .await;

        let v3_mock = server.mock("POST", WALLBOX_PATH_V3)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(status_body())
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string())
            .unwrap()
            .with_v4_status(true);
        let data = client.get_data("5010KET1234W0001").await.unwrap();

        assert_eq!(data.sn, "5010KET1234W0001");
        v4_mock.assert_async().await;
        v3_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_change_status_sends_status_as_string() {
        let mut server = Server::new_async().await;

        server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .create_async()
            .await;

        let command_mock = server.mock("POST", POWER_CONTROL_PATH)
            .match_body(Matcher::Json(json!({"sn": "sn1", "status": "2"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"code": 0, "msg": "success", "data": {}}).to_string())
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string()).unwrap();
        client.change_status("sn1", ChargeControl::Stop).await.unwrap();

        command_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_charge_mode_with_power() {
        let mut server = Server::new_async().await;

        server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .create_async()
            .await;

        let command_mock = server.mock("POST", SET_CHARGE_MODE_PATH)
            .match_body(Matcher::Json(json!({"sn": "sn1", "type": 0, "charge_power": 7.4})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"code": 0, "msg": "success", "data": {}}).to_string())
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string()).unwrap();
        client.set_charge_mode("sn1", 0, Some(7.4)).await.unwrap();

        command_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_command_http_error_fails_the_call() {
        let mut server = Server::new_async().await;

        server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .create_async()
            .await;

        server.mock("POST", POWER_CONTROL_PATH)
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string()).unwrap();
        let result = client.change_status("sn1", ChargeControl::Start).await;

        assert!(matches!(result, Err(SemsError::Api(_))));
    }

    #[tokio::test]
    async fn test_test_authentication() {
        let mut server = Server::new_async().await;

        server.mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(login_body())
            .create_async()
            .await;

        let mut client = SemsClient::with_base_url(server.url(), "user".to_string(), "pw".to_string()).unwrap();
        assert!(client.test_authentication().await);
    }
}
