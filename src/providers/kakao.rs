use crate::IdentityProvider;

const AUTHORIZE_URL: &str = "https://kauth.kakao.com/oauth/authorize";

#[derive(Debug, Clone, Default)]
pub struct KakaoProvider {
    prompt: Option<String>,
}

impl IdentityProvider for KakaoProvider {
    fn id(&self) -> &'static str {
        "kakao"
    }

    fn authorize_url(&self) -> &'static str {
        AUTHORIZE_URL
    }

    fn authorize_params(&self) -> Vec<(String, String)> {
        self.prompt
            .iter()
            .map(|prompt| ("prompt".to_string(), prompt.clone()))
            .collect()
    }
}

impl KakaoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// `prompt=login` forces the account picker even with a live provider session.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_only_sent_when_set() {
        assert!(KakaoProvider::new().authorize_params().is_empty());
        assert_eq!(
            KakaoProvider::new().with_prompt("login").authorize_params(),
            vec![("prompt".to_string(), "login".to_string())]
        );
    }
}
