use serde::{Deserialize, Serialize};
use serde_json::Value;
use wasm_bindgen::JsCast;
use yew::prelude::*;

use crate::{api, session, state};

const MAX_IMAGES: u32 = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct ReportTarget {
    pub equipment_id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ReportTarget {
    pub fn from_search(search: &str) -> Option<Self> {
        let params = state::query_params(search);
        let number = |key: &str| state::param(&params, key).and_then(|value| value.parse::<f64>().ok());
        Some(Self {
            equipment_id: state::param(&params, "equipmentId")?.to_string(),
            name: state::param(&params, "equipmentName")
                .unwrap_or_default()
                .to_string(),
            latitude: number("lat"),
            longitude: number("lng"),
        })
    }

    /// Database ids go out as numbers, installation numbers as strings.
    fn installation(&self) -> Value {
        match self.equipment_id.parse::<u64>() {
            Ok(id) => Value::from(id),
            Err(_) => Value::from(self.equipment_id.clone()),
        }
    }
}

#[derive(Serialize)]
struct ReportBody {
    message: String,
    #[serde(rename = "type")]
    kind: String,
    images_url: Option<String>,
    installation: Value,
}

#[derive(Deserialize)]
struct UploadedImage {
    url: String,
}

#[derive(Deserialize)]
struct UploadBatch {
    uploaded: Vec<UploadedImage>,
    #[serde(default)]
    failed: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct FormStatus {
    sending: bool,
    error: Option<String>,
    notice: Option<String>,
    warnings: Vec<String>,
}

#[derive(Properties, PartialEq)]
pub struct ReportPageProps {
    pub target: Option<ReportTarget>,
}

#[function_component(ReportPage)]
pub fn report_page(props: &ReportPageProps) -> Html {
    let types = use_state(Vec::<String>::new);
    let kind = use_state(String::new);
    let message = use_state(String::new);
    let files = use_state(|| None::<web_sys::FileList>);
    let status = use_state(FormStatus::default);

    {
        let types = types.clone();
        let kind = kind.clone();
        use_effect_with((), move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                if let Ok(list) = api::get_json::<Vec<String>>("/api/reports/types").await {
                    if let Some(first) = list.first() {
                        kind.set(first.clone());
                    }
                    types.set(list);
                }
            });
            || ()
        });
    }

    let Some(target) = props.target.clone() else {
        return html! {
            <div class="report-page">
                <div class="warning">{"Aucun équipement sélectionné."}</div>
                <a href="/map">{"Retour à la carte"}</a>
            </div>
        };
    };

    let on_kind = {
        let kind = kind.clone();
        Callback::from(move |event: Event| {
            if let Some(select) = event
                .target()
                .and_then(|target| target.dyn_into::<web_sys::HtmlSelectElement>().ok())
            {
                kind.set(select.value());
            }
        })
    };

    let on_message = {
        let message = message.clone();
        Callback::from(move |event: InputEvent| {
            if let Some(area) = event
                .target()
                .and_then(|target| target.dyn_into::<web_sys::HtmlTextAreaElement>().ok())
            {
                message.set(area.value());
            }
        })
    };

    let on_files = {
        let files = files.clone();
        let status = status.clone();
        Callback::from(move |event: Event| {
            let list = event
                .target()
                .and_then(|target| target.dyn_into::<web_sys::HtmlInputElement>().ok())
                .and_then(|input| input.files());
            let too_many = list.as_ref().map(|list| list.length() > MAX_IMAGES).unwrap_or(false);
            let mut next = (*status).clone();
            next.error = too_many.then(|| "Maximum 3 images autorisées par signalement".to_string());
            status.set(next);
            files.set(if too_many { None } else { list });
        })
    };

    let on_submit = {
        let target = target.clone();
        let kind = kind.clone();
        let message = message.clone();
        let files = files.clone();
        let status = status.clone();
        Callback::from(move |event: SubmitEvent| {
            event.prevent_default();
            if message.trim().is_empty() {
                status.set(FormStatus {
                    error: Some("Le message est requis".to_string()),
                    ..FormStatus::default()
                });
                return;
            }
            status.set(FormStatus {
                sending: true,
                ..FormStatus::default()
            });
            let body = ReportBody {
                message: (*message).clone(),
                kind: (*kind).clone(),
                images_url: None,
                installation: target.installation(),
            };
            submit(body, (*files).clone(), status.clone());
        })
    };

    let current = (*status).clone();
    let location = match (target.latitude, target.longitude) {
        (Some(lat), Some(lng)) => html! { <p class="note">{format!("{lat:.5}, {lng:.5}")}</p> },
        _ => html! {},
    };

    html! {
        <div class="report-page">
            <header>
                <a href="/map">{"← Carte"}</a>
                <h1>{"Signaler un problème"}</h1>
                <p class="eyebrow">{target.name.clone()}</p>
                {location}
            </header>
            <form class="card" onsubmit={on_submit}>
                <label>
                    {"Type de problème"}
                    <select onchange={on_kind}>
                        { for types.iter().map(|name| html! {
                            <option value={name.clone()} selected={*name == *kind}>{name.clone()}</option>
                        }) }
                    </select>
                </label>
                <label>
                    {"Description"}
                    <textarea rows="5" value={(*message).clone()} oninput={on_message} />
                </label>
                <label>
                    {"Photos (3 maximum)"}
                    <input type="file" accept="image/jpeg,image/png,image/webp,image/gif" multiple=true onchange={on_files} />
                </label>
                if let Some(error) = current.error.clone() {
                    <div class="warning">{error}</div>
                }
                { for current.warnings.iter().map(|warning| html! { <div class="note">{warning.clone()}</div> }) }
                if let Some(notice) = current.notice.clone() {
                    <div class="success">{notice}</div>
                }
                <button type="submit" disabled={current.sending}>
                    { if current.sending { "Envoi…" } else { "Envoyer" } }
                </button>
            </form>
        </div>
    }
}

fn submit(mut body: ReportBody, files: Option<web_sys::FileList>, status: UseStateHandle<FormStatus>) {
    wasm_bindgen_futures::spawn_local(async move {
        let mut warnings = Vec::new();

        if let Some(files) = files.filter(|list| list.length() > 0) {
            match upload(&files).await {
                Ok(batch) => {
                    warnings = batch.failed;
                    let urls: Vec<String> = batch.uploaded.into_iter().map(|image| image.url).collect();
                    if !urls.is_empty() {
                        body.images_url = Some(urls.join(","));
                    }
                }
                Err(err) => {
                    status.set(FormStatus {
                        error: Some(err),
                        ..FormStatus::default()
                    });
                    return;
                }
            }
        }

        let token = session::token();
        let result = api::post_json::<_, Value>("/api/reports", &body, token.as_deref()).await;
        status.set(match result {
            Ok(_) => FormStatus {
                notice: Some("Signalement envoyé avec succès".to_string()),
                warnings,
                ..FormStatus::default()
            },
            Err(err) => FormStatus {
                error: Some(err),
                warnings,
                ..FormStatus::default()
            },
        });
    });
}

async fn upload(files: &web_sys::FileList) -> Result<UploadBatch, String> {
    let form = web_sys::FormData::new().map_err(|_| "Formulaire indisponible".to_string())?;
    for index in 0..files.length() {
        if let Some(file) = files.item(index) {
            form.append_with_blob_and_filename(&format!("image_{index}"), &file, &file.name())
                .map_err(|_| "Fichier illisible".to_string())?;
        }
    }
    api::post_form("/api/uploads", form).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_reads_the_report_link() {
        let target = ReportTarget::from_search(&state::report_url("12", "City stade", 45.75, 4.85)
            .replace("/report", ""))
        .unwrap();
        assert_eq!(target.equipment_id, "12");
        assert_eq!(target.name, "City stade");
        assert_eq!(target.latitude, Some(45.75));
        assert_eq!(target.installation(), Value::from(12u64));
    }

    #[test]
    fn installation_numbers_stay_strings() {
        let target = ReportTarget::from_search("?equipmentId=I130010048").unwrap();
        assert_eq!(target.installation(), Value::from("I130010048"));
        assert_eq!(target.longitude, None);
    }

    #[test]
    fn target_requires_an_equipment() {
        assert_eq!(ReportTarget::from_search("?equipmentName=x"), None);
    }
}
