use gloo_net::http::{Request, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

async fn read<R: DeserializeOwned>(response: Response) -> Result<R, String> {
    if !response.ok() {
        let status = response.status();
        return Err(match response.json::<ApiError>().await {
            Ok(error) => error.message,
            Err(_) => format!("Erreur {status}"),
        });
    }
    response.json::<R>().await.map_err(|err| err.to_string())
}

pub async fn get_json<R: DeserializeOwned>(url: &str) -> Result<R, String> {
    let response = Request::get(url).send().await.map_err(|err| err.to_string())?;
    read(response).await
}

pub async fn post_json<B: Serialize, R: DeserializeOwned>(
    url: &str,
    body: &B,
    token: Option<&str>,
) -> Result<R, String> {
    let mut request = Request::post(url);
    if let Some(token) = token {
        request = request.header("Authorization", &format!("Bearer {token}"));
    }
    let response = request
        .json(body)
        .map_err(|err| err.to_string())?
        .send()
        .await
        .map_err(|err| err.to_string())?;
    read(response).await
}

pub async fn post_form<R: DeserializeOwned>(url: &str, form: web_sys::FormData) -> Result<R, String> {
    let response = Request::post(url)
        .body(form)
        .map_err(|err| err.to_string())?
        .send()
        .await
        .map_err(|err| err.to_string())?;
    read(response).await
}
