mod kakao;
mod provider;

pub use kakao::KakaoProvider;
pub use provider::IdentityProvider;
