pub trait IdentityProvider: Send + Sync {
    fn id(&self) -> &'static str;
    fn authorize_url(&self) -> &'static str;

    fn default_scope(&self) -> Option<&'static str> {
        None
    }

    fn authorize_params(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}
