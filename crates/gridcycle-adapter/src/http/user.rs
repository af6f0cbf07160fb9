/*
[INPUT]:  API-key-authenticated and signed user endpoints
[OUTPUT]: Listen keys for the user-data stream and account balances
[POS]:    HTTP layer - user data endpoints
[UPDATE]: When adding new user endpoints or changing keep-alive flow
*/

use reqwest::Method;

use crate::http::client::BinanceClient;
use crate::http::error::Result;
use crate::types::responses::AccountInfo;
use crate::types::{AssetBalance, ListenKey};

impl BinanceClient {
    /// Create a user-data stream listen key.
    ///
    /// POST /api/v3/userDataStream
    pub async fn new_listen_key(&self) -> Result<String> {
        let raw = self
            .keyed_request(Method::POST, "/api/v3/userDataStream", Vec::new())
            .await?;
        let key: ListenKey = serde_json::from_value(raw)?;
        Ok(key.listen_key)
    }

    /// Keep a listen key alive. The venue expires keys after an hour of
    /// silence; callers renew well inside that window.
    ///
    /// PUT /api/v3/userDataStream
    pub async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()> {
        let params = vec![("listenKey".to_string(), listen_key.to_string())];
        self.keyed_request(Method::PUT, "/api/v3/userDataStream", params)
            .await?;
        Ok(())
    }

    /// Account balances, optionally filtered to a set of assets.
    ///
    /// GET /api/v3/account
    pub async fn account_balances(&self, assets: &[String]) -> Result<Vec<AssetBalance>> {
        let raw = self
            .signed_request_raw(Method::GET, "/api/v3/account", Vec::new())
            .await?;
        let account: AccountInfo = serde_json::from_value(raw)?;

        let balances = account
            .balances
            .into_iter()
            .filter(|balance| assets.is_empty() || assets.iter().any(|a| a == &balance.asset))
            .collect();
        Ok(balances)
    }
}
