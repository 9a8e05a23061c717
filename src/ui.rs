//! Browser front end: a search form over the listing database.
//!
//! # Endpoints
//!
//! - `GET /` - Search form
//! - `POST /search` - Run a search and render results below the form
//! - `GET /images/*` - Generated listing images
//! - `GET /healthz` - Liveness probe

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Form, Router};
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::augment::Augmenter;
use crate::error::Result;
use crate::generator::DEFAULT_CITIES;
use crate::listing::SearchResult;
use crate::llm::{refine_input, ChatModel};
use crate::preferences::BuyerPreferences;
use crate::vector_db::VectorDatabase;

/// Amenity checkboxes offered by the form.
pub const AMENITIES: [&str; 7] = [
    "Pool",
    "Garage",
    "Garden",
    "Gym",
    "Fireplace",
    "Balcony",
    "Basement",
];

const SLIDER_MIN: u32 = 1;
const SLIDER_MAX: u32 = 10;
const SLIDER_DEFAULT: u32 = 3;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: VectorDatabase,
    pub augmenter: Augmenter,
    pub chat: Arc<dyn ChatModel>,
    /// Pass the free-text description through the chat model before searching.
    pub refine_description: bool,
}

/// Submitted search form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchForm {
    pub location: String,
    pub house_size: String,
    pub max_price: String,
    pub amenities: Vec<String>,
    pub description: String,
    pub num_bedrooms: u32,
    pub num_bathrooms: u32,
    pub num_listings: u32,
}

impl Default for SearchForm {
    fn default() -> Self {
        Self {
            location: String::new(),
            house_size: String::new(),
            max_price: String::new(),
            amenities: Vec::new(),
            description: String::new(),
            num_bedrooms: SLIDER_DEFAULT,
            num_bathrooms: SLIDER_DEFAULT,
            num_listings: SLIDER_DEFAULT,
        }
    }
}

impl SearchForm {
    /// Builds the form from urlencoded pairs; `amenities` may repeat.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> std::result::Result<Self, String> {
        let mut form = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "location" => form.location = value.trim().to_string(),
                "house_size" => form.house_size = value.trim().to_string(),
                "max_price" => form.max_price = value.trim().to_string(),
                "description" => form.description = value.trim().to_string(),
                "amenities" => {
                    if !value.trim().is_empty() {
                        form.amenities.push(value.trim().to_string());
                    }
                }
                "num_bedrooms" => form.num_bedrooms = parse_slider("bedrooms", &value)?,
                "num_bathrooms" => form.num_bathrooms = parse_slider("bathrooms", &value)?,
                "num_listings" => form.num_listings = parse_slider("listings", &value)?,
                _ => {}
            }
        }
        Ok(form)
    }

    /// Converts the form into buyer preferences, using `description` in place
    /// of the raw text (it may have been refined).
    pub fn preferences(
        &self,
        description: String,
    ) -> std::result::Result<BuyerPreferences, String> {
        let (city, state) = self
            .location
            .split_once(", ")
            .filter(|(city, state)| !city.trim().is_empty() && !state.trim().is_empty())
            .ok_or_else(|| {
                format!("location must look like \"City, State\", got {:?}", self.location)
            })?;
        Ok(BuyerPreferences {
            state: vec![state.trim().to_string()],
            city: vec![city.trim().to_string()],
            house_size: self.house_size.clone(),
            amenities: self.amenities.clone(),
            max_price: Some(self.max_price.clone()).filter(|p| !p.is_empty()),
            bedrooms: Some(self.num_bedrooms),
            bathrooms: Some(self.num_bathrooms),
            description: Some(description).filter(|d| !d.trim().is_empty()),
            ..BuyerPreferences::default()
        })
    }
}

fn parse_slider(name: &str, value: &str) -> std::result::Result<u32, String> {
    let parsed: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("number of {name} must be a whole number, got {value:?}"))?;
    if !(SLIDER_MIN..=SLIDER_MAX).contains(&parsed) {
        return Err(format!(
            "number of {name} must be between {SLIDER_MIN} and {SLIDER_MAX}"
        ));
    }
    Ok(parsed)
}

/// Builds the application router.
pub fn router(state: AppState, image_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/search", post(search_handler))
        .route("/healthz", get(healthz))
        .nest_service("/images", ServeDir::new(image_dir))
        .with_state(state)
}

/// Serves the UI until Ctrl-C.
pub async fn serve(state: AppState, image_dir: &Path, bind: SocketAddr) -> Result<()> {
    let app = router(state, image_dir);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("HomeMatch listening on http://{bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn index_handler() -> Html<String> {
    Html(render_page(&SearchForm::default(), None))
}

type HtmlError = (StatusCode, Html<String>);

async fn search_handler(
    State(state): State<AppState>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> std::result::Result<Html<String>, HtmlError> {
    let form = SearchForm::from_pairs(pairs).map_err(bad_request)?;
    let description = if state.refine_description {
        refine_input(state.chat.as_ref(), &form.description).await
    } else {
        form.description.clone()
    };
    let prefs = form.preferences(description).map_err(bad_request)?;

    let results = state
        .db
        .search(&prefs, form.num_listings as usize)
        .await
        .map_err(|err| internal_error(&form, err))?;
    let results = if results.is_empty() {
        results
    } else {
        state
            .augmenter
            .augment_all(&prefs, results)
            .await
            .map_err(|err| internal_error(&form, err))?
    };
    info!(results = results.len(), location = %form.location, "search served");
    Ok(Html(render_page(&form, Some(&results))))
}

fn bad_request(message: String) -> HtmlError {
    (
        StatusCode::BAD_REQUEST,
        Html(render_error(&SearchForm::default(), &message)),
    )
}

fn internal_error(form: &SearchForm, err: crate::error::HomeMatchError) -> HtmlError {
    error!(error = %err, "error during search");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(render_error(form, &format!("Search failed: {err}"))),
    )
}

const STYLE: &str = "body{font-family:sans-serif;max-width:1100px;margin:2em auto;padding:0 1em}\
.row{display:flex;gap:1.5em;flex-wrap:wrap;margin-bottom:1em}\
.row label{display:flex;flex-direction:column;gap:.3em}\
table{border-collapse:collapse;width:100%}td,th{border:1px solid #ccc;padding:.5em;vertical-align:top}\
.gallery{display:flex;gap:1em;flex-wrap:wrap}.gallery img{max-width:320px}\
.error{color:#b00020}";

fn render_error(form: &SearchForm, message: &str) -> String {
    let mut body = render_form(form);
    let _ = write!(body, "<p class=\"error\">{}</p>", text(message));
    wrap_page(&body)
}

/// Full page: the form, followed by results when a search ran.
pub fn render_page(form: &SearchForm, results: Option<&[SearchResult]>) -> String {
    let mut body = render_form(form);
    if let Some(results) = results {
        body.push_str(&render_results(results));
    }
    wrap_page(&body)
}

fn wrap_page(body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>HomeMatch</title>\
         <style>{STYLE}</style></head><body>\
         <h2>Welcome to HomeMatch</h2>\
         <p>Fill in your preferences and press 'Search' to find a home!</p>{body}</body></html>"
    )
}

fn render_form(form: &SearchForm) -> String {
    let mut html = String::from("<form method=\"post\" action=\"/search\"><div class=\"row\">");

    html.push_str("<label>Location<select name=\"location\" required>");
    for city in DEFAULT_CITIES {
        let selected = if form.location == city { " selected" } else { "" };
        let _ = write!(
            html,
            "<option value=\"{}\"{selected}>{}</option>",
            attr(city),
            text(city)
        );
    }
    html.push_str("</select><small>Where would you like to search for a property?</small></label>");
    let _ = write!(
        html,
        "<label>House Size (sq ft)<input name=\"house_size\" placeholder=\"e.g., 2000\" value=\"{}\"></label>\
         <label>Maximum Price<input name=\"max_price\" placeholder=\"e.g., 500000\" value=\"{}\"></label>",
        attr(&form.house_size),
        attr(&form.max_price)
    );
    html.push_str("</div><div class=\"row\"><fieldset><legend>Select Amenities</legend>");
    for amenity in AMENITIES {
        let checked = if form.amenities.iter().any(|a| a == amenity) {
            " checked"
        } else {
            ""
        };
        let _ = write!(
            html,
            "<label><input type=\"checkbox\" name=\"amenities\" value=\"{amenity}\"{checked}> {amenity}</label>"
        );
    }
    let _ = write!(
        html,
        "</fieldset><label>Description<textarea name=\"description\" \
         placeholder=\"Additional details about the house...\">{}</textarea></label>",
        text(&form.description)
    );
    html.push_str(&slider("num_bedrooms", "Number of Bedrooms", form.num_bedrooms));
    html.push_str(&slider("num_bathrooms", "Number of Bathrooms", form.num_bathrooms));
    html.push_str(&slider(
        "num_listings",
        "How many listings do you wish to see?",
        form.num_listings,
    ));
    html.push_str("</div><button type=\"submit\">Search</button></form>");
    html
}

fn slider(name: &str, label: &str, value: u32) -> String {
    format!(
        "<label>{label}<input type=\"range\" name=\"{name}\" min=\"{SLIDER_MIN}\" max=\"{SLIDER_MAX}\" \
         step=\"1\" value=\"{value}\" oninput=\"this.nextElementSibling.value=this.value\">\
         <output>{value}</output></label>"
    )
}

fn render_results(results: &[SearchResult]) -> String {
    let mut html = String::from(
        "<h3>Results</h3><table><thead><tr><th>Title</th><th>Price</th><th>Location</th>\
         <th>Description</th></tr></thead><tbody>",
    );
    if results.is_empty() {
        html.push_str(
            "<tr><td colspan=\"4\">No matching listings found.</td></tr></tbody></table>",
        );
        return html;
    }
    for result in results {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            text(&result.title()),
            text(&result.price_label()),
            text(&result.location()),
            text(result.display_description())
        );
    }
    html.push_str("</tbody></table><h3>Listing Images</h3><div class=\"gallery\">");
    for result in results {
        if let Some(file) = result.image_file_name() {
            let _ = write!(
                html,
                "<figure><img src=\"/images/{}\" alt=\"{}\"><figcaption>{}</figcaption></figure>",
                attr(file),
                attr(&result.title()),
                text(&result.location())
            );
        }
    }
    html.push_str("</div>");
    html
}
