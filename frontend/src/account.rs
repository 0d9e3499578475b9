use serde::{Deserialize, Serialize};
use wasm_bindgen::JsCast;
use yew::prelude::*;

use crate::{api, session, state, text_input};

pub const CODE_LENGTH: usize = 6;
const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Serialize)]
struct Registration {
    username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    email: String,
    password: String,
}

#[derive(Serialize)]
struct VerifyEmail {
    code: String,
    email: String,
}

#[derive(Serialize)]
struct EmailOnly {
    email: String,
}

#[derive(Serialize)]
struct ResetPassword {
    token: String,
    password: String,
}

#[derive(Serialize)]
struct TokenOnly {
    token: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    message: String,
}

#[derive(Deserialize)]
struct VerifyEmailResponse {
    message: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<session::User>,
}

#[derive(Deserialize)]
struct TokenValidity {
    valid: bool,
}

pub fn check_new_password(password: &str, confirmation: &str) -> Result<(), &'static str> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err("Le mot de passe doit contenir au moins 8 caractères");
    }
    if password != confirmation {
        return Err("Les mots de passe ne correspondent pas");
    }
    Ok(())
}

/// Keeps the digits of a typed code, at most [`CODE_LENGTH`] of them.
pub fn sanitize_code(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_digit)
        .take(CODE_LENGTH)
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
struct FormStatus {
    sending: bool,
    error: Option<String>,
    notice: Option<String>,
}

impl FormStatus {
    fn sending() -> Self {
        Self {
            sending: true,
            ..Self::default()
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn notice(message: impl Into<String>) -> Self {
        Self {
            notice: Some(message.into()),
            ..Self::default()
        }
    }

    fn render(&self) -> Html {
        html! {
            <>
                if let Some(error) = self.error.clone() {
                    <div class="warning">{error}</div>
                }
                if let Some(notice) = self.notice.clone() {
                    <div class="success">{notice}</div>
                }
            </>
        }
    }
}

fn navigate(url: &str) {
    if let Some(window) = web_sys::window() {
        if let Err(err) = window.location().set_href(url) {
            web_sys::console::error_1(&err);
        }
    }
}

#[function_component(RegisterPage)]
pub fn register_page() -> Html {
    let username = use_state(String::new);
    let name = use_state(String::new);
    let email = use_state(String::new);
    let password = use_state(String::new);
    let confirmation = use_state(String::new);
    let status = use_state(FormStatus::default);

    let on_submit = {
        let username = username.clone();
        let name = name.clone();
        let email = email.clone();
        let password = password.clone();
        let confirmation = confirmation.clone();
        let status = status.clone();
        Callback::from(move |event: SubmitEvent| {
            event.prevent_default();
            if let Err(message) = check_new_password(&password, &confirmation) {
                status.set(FormStatus::error(message));
                return;
            }
            let body = Registration {
                username: username.trim().to_string(),
                name: Some(name.trim().to_string()).filter(|name| !name.is_empty()),
                email: email.trim().to_string(),
                password: (*password).clone(),
            };
            let status = status.clone();
            status.set(FormStatus::sending());
            wasm_bindgen_futures::spawn_local(async move {
                match api::post_json::<_, MessageResponse>("/api/auth/register", &body, None).await {
                    Ok(_) => navigate(&state::verification_url(&body.email)),
                    Err(message) => status.set(FormStatus::error(message)),
                }
            });
        })
    };

    html! {
        <div class="account-page">
            <form onsubmit={on_submit}>
                <h2>{"Créer un compte"}</h2>
                <input placeholder="Nom d'utilisateur" required={true} value={(*username).clone()} oninput={text_input(username.clone())} />
                <input placeholder="Nom (facultatif)" value={(*name).clone()} oninput={text_input(name.clone())} />
                <input type="email" placeholder="Email" required={true} value={(*email).clone()} oninput={text_input(email.clone())} />
                <input type="password" placeholder="Mot de passe" required={true} value={(*password).clone()} oninput={text_input(password.clone())} />
                <input type="password" placeholder="Confirmer le mot de passe" required={true} value={(*confirmation).clone()} oninput={text_input(confirmation.clone())} />
                {status.render()}
                <button type="submit" disabled={status.sending}>{"S'inscrire"}</button>
                <a href="/map">{"Déjà inscrit ? Se connecter depuis la carte"}</a>
            </form>
        </div>
    }
}

#[derive(Properties, PartialEq)]
pub struct VerificationPageProps {
    pub email: String,
}

#[function_component(VerificationPage)]
pub fn verification_page(props: &VerificationPageProps) -> Html {
    let code = use_state(String::new);
    let status = use_state(FormStatus::default);

    let on_code = {
        let code = code.clone();
        Callback::from(move |event: InputEvent| {
            if let Some(input) = event
                .target()
                .and_then(|target| target.dyn_into::<web_sys::HtmlInputElement>().ok())
            {
                let digits = sanitize_code(&input.value());
                input.set_value(&digits);
                code.set(digits);
            }
        })
    };

    let on_submit = {
        let email = props.email.clone();
        let code = code.clone();
        let status = status.clone();
        Callback::from(move |event: SubmitEvent| {
            event.prevent_default();
            if code.len() != CODE_LENGTH {
                status.set(FormStatus::error("Le code contient 6 chiffres"));
                return;
            }
            let body = VerifyEmail {
                code: (*code).clone(),
                email: email.clone(),
            };
            let status = status.clone();
            status.set(FormStatus::sending());
            wasm_bindgen_futures::spawn_local(async move {
                match api::post_json::<_, VerifyEmailResponse>("/api/auth/verify-email", &body, None).await {
                    Ok(response) => {
                        if let (Some(token), Some(user)) = (response.token, response.user) {
                            session::save(&session::AuthResponse { token, user });
                        }
                        status.set(FormStatus::notice(response.message));
                    }
                    Err(message) => status.set(FormStatus::error(message)),
                }
            });
        })
    };

    let verified = status.notice.is_some();
    html! {
        <div class="account-page">
            <form onsubmit={on_submit}>
                <h2>{"Vérification Email"}</h2>
                <p>{"Un code de vérification a été envoyé à "}<strong>{props.email.clone()}</strong></p>
                <input class="code" inputmode="numeric" autocomplete="one-time-code" maxlength="6" value={(*code).clone()} oninput={on_code} />
                {status.render()}
                if verified {
                    <a href="/map">{"Aller à la carte"}</a>
                } else {
                    <button type="submit" disabled={status.sending}>{"Vérifier"}</button>
                }
            </form>
        </div>
    }
}

#[function_component(ForgotPasswordPage)]
pub fn forgot_password_page() -> Html {
    let email = use_state(String::new);
    let status = use_state(FormStatus::default);

    let on_submit = {
        let email = email.clone();
        let status = status.clone();
        Callback::from(move |event: SubmitEvent| {
            event.prevent_default();
            let body = EmailOnly {
                email: email.trim().to_string(),
            };
            let status = status.clone();
            status.set(FormStatus::sending());
            wasm_bindgen_futures::spawn_local(async move {
                match api::post_json::<_, MessageResponse>("/api/auth/forgot-password", &body, None).await {
                    Ok(response) => status.set(FormStatus::notice(response.message)),
                    Err(message) => status.set(FormStatus::error(message)),
                }
            });
        })
    };

    html! {
        <div class="account-page">
            <form onsubmit={on_submit}>
                <h2>{"Mot de passe oublié"}</h2>
                <input type="email" placeholder="Email" required={true} value={(*email).clone()} oninput={text_input(email.clone())} />
                {status.render()}
                <button type="submit" disabled={status.sending}>{"Envoyer le lien"}</button>
                <a href="/map">{"Retour à la carte"}</a>
            </form>
        </div>
    }
}

#[derive(Properties, PartialEq)]
pub struct ResetPasswordPageProps {
    pub token: String,
}

#[function_component(ResetPasswordPage)]
pub fn reset_password_page(props: &ResetPasswordPageProps) -> Html {
    let password = use_state(String::new);
    let confirmation = use_state(String::new);
    let status = use_state(FormStatus::default);
    let token_valid = use_state(|| None::<bool>);

    {
        let token_valid = token_valid.clone();
        use_effect_with(props.token.clone(), move |token| {
            let body = TokenOnly {
                token: token.clone(),
            };
            wasm_bindgen_futures::spawn_local(async move {
                let valid = api::post_json::<_, TokenValidity>("/api/auth/verify-reset-token", &body, None)
                    .await
                    .map(|validity| validity.valid)
                    .unwrap_or(false);
                token_valid.set(Some(valid));
            });
            || ()
        });
    }

    let on_submit = {
        let token = props.token.clone();
        let password = password.clone();
        let confirmation = confirmation.clone();
        let status = status.clone();
        Callback::from(move |event: SubmitEvent| {
            event.prevent_default();
            if let Err(message) = check_new_password(&password, &confirmation) {
                status.set(FormStatus::error(message));
                return;
            }
            let body = ResetPassword {
                token: token.clone(),
                password: (*password).clone(),
            };
            let status = status.clone();
            status.set(FormStatus::sending());
            wasm_bindgen_futures::spawn_local(async move {
                match api::post_json::<_, MessageResponse>("/api/auth/reset-password", &body, None).await {
                    Ok(response) => status.set(FormStatus::notice(response.message)),
                    Err(message) => status.set(FormStatus::error(message)),
                }
            });
        })
    };

    let form = match *token_valid {
        None => html! { <p>{"Vérification du lien..."}</p> },
        Some(false) => html! {
            <>
                <div class="warning">{"Token invalide ou expiré"}</div>
                <a href="/forgot-password">{"Demander un nouveau lien"}</a>
            </>
        },
        Some(true) if status.notice.is_some() => html! {
            <>
                {status.render()}
                <a href="/map">{"Se connecter depuis la carte"}</a>
            </>
        },
        Some(true) => html! {
            <>
                <input type="password" placeholder="Nouveau mot de passe" required={true} value={(*password).clone()} oninput={text_input(password.clone())} />
                <input type="password" placeholder="Confirmer le mot de passe" required={true} value={(*confirmation).clone()} oninput={text_input(confirmation.clone())} />
                {status.render()}
                <button type="submit" disabled={status.sending}>{"Réinitialiser"}</button>
            </>
        },
    };

    html! {
        <div class="account-page">
            <form onsubmit={on_submit}>
                <h2>{"Nouveau mot de passe"}</h2>
                {form}
            </form>
        </div>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_passwords_need_length_and_confirmation() {
        assert_eq!(
            check_new_password("court", "court"),
            Err("Le mot de passe doit contenir au moins 8 caractères")
        );
        assert_eq!(
            check_new_password("longenough", "longenougH"),
            Err("Les mots de passe ne correspondent pas")
        );
        assert_eq!(check_new_password("éèàùçôîâ", "éèàùçôîâ"), Ok(()));
    }

    #[test]
    fn codes_keep_six_digits() {
        assert_eq!(sanitize_code("12a3 4-56789"), "123456");
        assert_eq!(sanitize_code("abc"), "");
    }
}
