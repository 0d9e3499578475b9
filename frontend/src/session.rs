use serde::{Deserialize, Serialize};

const TOKEN_KEY: &str = "authToken";
const USER_KEY: &str = "user";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub token: String,
    pub user: Option<User>,
}

fn storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok().flatten()
}

pub fn load() -> Option<Session> {
    let store = storage()?;
    let token = store.get_item(TOKEN_KEY).ok().flatten()?;
    if token.is_empty() {
        return None;
    }
    let user = store
        .get_item(USER_KEY)
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok());
    Some(Session { token, user })
}

pub fn save(response: &AuthResponse) -> Session {
    if let Some(store) = storage() {
        let _ = store.set_item(TOKEN_KEY, &response.token);
        if let Ok(raw) = serde_json::to_string(&response.user) {
            let _ = store.set_item(USER_KEY, &raw);
        }
    }
    Session {
        token: response.token.clone(),
        user: Some(response.user.clone()),
    }
}

pub fn clear() {
    if let Some(store) = storage() {
        let _ = store.remove_item(TOKEN_KEY);
        let _ = store.remove_item(USER_KEY);
    }
}

pub fn token() -> Option<String> {
    load().map(|session| session.token)
}
