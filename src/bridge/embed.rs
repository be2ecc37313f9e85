use anyhow::{Context, Result};
use url::Url;

use crate::config::BridgeConfig;

/// トラッキング画面に注入するスクリプト。window の `postMessage`、`message` イベント、
/// `webViewCallback` 呼び出しをすべて文字列にしてホストチャネルへ流す。
pub const BRIDGE_SHIM: &str = r#"
window.addEventListener('message', function(event) {
  window.ReactNativeWebView.postMessage(JSON.stringify(event.data));
});

window.webViewCallback = function(data) {
  window.ReactNativeWebView.postMessage(JSON.stringify(data));
};

window.postMessage = function(data) {
  window.ReactNativeWebView.postMessage(typeof data === 'string' ? data : JSON.stringify(data));
};

true;
"#;

impl BridgeConfig {
    /// この種目のトラッキング画面の URL
    pub fn tracking_url(&self) -> Result<Url> {
        let width = self.width.to_string();
        let height = self.height.to_string();
        Url::parse_with_params(
            &self.tracking_url,
            [
                ("token", self.api_key.as_str()),
                ("exercise", self.exercise.as_str()),
                ("difficulty", self.difficulty.as_str()),
                ("width", width.as_str()),
                ("height", height.as_str()),
                ("camera", self.camera.as_str()),
            ],
        )
        .with_context(|| format!("invalid tracking url {:?}", self.tracking_url))
    }
}
