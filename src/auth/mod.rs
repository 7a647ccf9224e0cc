pub mod handlers;
pub mod one_time;
pub mod password;
pub mod session;

use serde::Serialize;

/// The two identity domains. Dashboard owners sign in to `Main`; community
/// members (usually via magic link) sign in to `Community`. Sessions never
/// cross realms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Realm {
    Main,
    Community,
}

impl Realm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Realm::Main => "main",
            Realm::Community => "community",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "main" => Some(Realm::Main),
            "community" => Some(Realm::Community),
            _ => None,
        }
    }
}

/// Type-level realm selector so one handler serves both route prefixes.
pub trait RealmKind: Send + Sync + 'static {
    const REALM: Realm;
}

pub struct MainRealm;
pub struct CommunityRealm;

impl RealmKind for MainRealm {
    const REALM: Realm = Realm::Main;
}

impl RealmKind for CommunityRealm {
    const REALM: Realm = Realm::Community;
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Loose shape check; the mail provider is the real validator.
pub fn looks_like_email(email: &str) -> bool {
    let mut parts = email.splitn(2, '@');
    match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        _ => false,
    }
}
