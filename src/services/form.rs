// src/services/form.rs

//! Browsing capability for cascading dropdown catalogs.
//!
//! The crawl driver only talks to [`SiteSession`]; the HTTP implementation
//! below drives the site's plain HTML search form. Tests substitute a
//! scripted session with no network access.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, FormControl, SiteAdapter};
use crate::utils::http::create_async_client;
use crate::utils::{normalize_whitespace, resolve_url};

/// One entry of a select menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormOption {
    pub value: String,
    pub label: String,
}

impl FormOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }

    /// Prompt entries such as `-- Select Make --` or an empty value.
    pub fn is_placeholder(&self) -> bool {
        let label = self.label.trim().to_ascii_lowercase();
        self.value.trim().is_empty() || label.starts_with("select") || label.starts_with("--")
    }
}

/// Values to put into the form before one submit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub location: Option<String>,
    pub make: String,
    pub model: Option<String>,
}

/// Text cells of one results-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub cells: Vec<String>,
}

impl ResultRow {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }
}

/// A live, stateful view of one catalog form.
///
/// Selecting a control invalidates the controls downstream of it.
#[async_trait]
pub trait SiteSession: Send {
    /// Navigate to the search page.
    async fn load(&mut self) -> Result<()>;

    /// Set a control's value.
    async fn select(&mut self, control: FormControl, value: &str) -> Result<()>;

    /// Current options of a control, placeholders excluded.
    async fn options(&mut self, control: FormControl) -> Result<Vec<FormOption>>;

    /// Submit the form with the current selections.
    async fn submit(&mut self) -> Result<()>;

    /// Rows of the rendered results table.
    async fn result_rows(&mut self) -> Result<Vec<ResultRow>>;

    /// Release the session. Called on every exit path.
    async fn close(&mut self) -> Result<()>;

    /// Apply a whole selection, submit, and read the results.
    async fn submit_selection(&mut self, selection: &Selection) -> Result<Vec<ResultRow>> {
        if let Some(location) = &selection.location {
            self.select(FormControl::Location, location).await?;
        }
        self.select(FormControl::Make, &selection.make).await?;
        if let Some(model) = &selection.model {
            self.select(FormControl::Model, model).await?;
        }
        self.submit().await?;
        self.result_rows().await
    }
}

/// Opens sessions against a site.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, site: &SiteAdapter) -> Result<Box<dyn SiteSession>>;
}

/// Opens [`HttpFormSession`]s sharing one HTTP client.
pub struct HttpSessionFactory {
    client: Client,
    timeout: Duration,
}

impl HttpSessionFactory {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self, site: &SiteAdapter) -> Result<Box<dyn SiteSession>> {
        let session = HttpFormSession::new(self.client.clone(), site.clone(), self.timeout)?;
        Ok(Box::new(session))
    }
}

/// Drives a server-rendered search form over HTTP.
///
/// Selections are kept as form fields; the page is re-fetched lazily when
/// a downstream menu is read after an upstream change.
pub struct HttpFormSession {
    client: Client,
    site: SiteAdapter,
    timeout: Duration,
    base_url: Url,
    /// Last fetched page. Kept as text since `scraper::Html` is not `Send`.
    page: Option<String>,
    hidden: Vec<(String, String)>,
    fields: Vec<(FormControl, String, String)>,
    dirty: bool,
}

impl HttpFormSession {
    pub fn new(client: Client, site: SiteAdapter, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&site.base_url)?;
        Ok(Self {
            client,
            site,
            timeout,
            base_url,
            page: None,
            hidden: Vec::new(),
            fields: Vec::new(),
            dirty: false,
        })
    }

    fn page(&self) -> Result<Html> {
        let text = self
            .page
            .as_deref()
            .ok_or_else(|| AppError::session(format!("{}: no page loaded", self.site.name)))?;
        Ok(Html::parse_document(text))
    }

    fn control_selector(&self, control: FormControl) -> Result<Selector> {
        let raw = self
            .site
            .selectors
            .control(control)
            .ok_or_else(|| AppError::ElementMissing {
                control: control.as_str().to_string(),
            })?;
        parse_selector(raw)
    }

    fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = self.hidden.clone();
        for (_, name, value) in &self.fields {
            pairs.retain(|(existing, _)| existing != name);
            pairs.push((name.clone(), value.clone()));
        }
        pairs
    }

    async fn fetch(&mut self, url: Url, post: bool) -> Result<()> {
        let pairs = self.query_pairs();
        let request = if post {
            self.client.post(url.clone()).form(&pairs)
        } else {
            self.client.get(url.clone()).query(&pairs)
        };

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| AppError::session(format!("navigation to {url} timed out")))??;
        if !response.status().is_success() {
            return Err(AppError::session(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let text = response.text().await?;
        log::debug!("Fetched {} ({} bytes)", url, text.len());

        self.page = Some(text);
        self.dirty = false;
        Ok(())
    }

    /// Resolve the form's action URL and method from the current page.
    fn form_target(&self) -> Result<(Url, bool, Vec<(String, String)>)> {
        let document = self.page()?;
        let form_selector = parse_selector(&self.site.selectors.search_form)?;
        let form = document
            .select(&form_selector)
            .next()
            .ok_or_else(|| AppError::ElementMissing {
                control: self.site.selectors.search_form.clone(),
            })?;

        let action = form.value().attr("action").unwrap_or("");
        let url = if action.trim().is_empty() {
            self.base_url.clone()
        } else {
            Url::parse(&resolve_url(&self.base_url, action))?
        };
        let post = form
            .value()
            .attr("method")
            .is_some_and(|m| m.eq_ignore_ascii_case("post"));
        Ok((url, post, hidden_inputs(form)))
    }

    async fn refresh(&mut self) -> Result<()> {
        let (url, post, _) = self.form_target()?;
        self.fetch(url, post).await
    }
}

#[async_trait]
impl SiteSession for HttpFormSession {
    async fn load(&mut self) -> Result<()> {
        self.fields.clear();
        self.fetch(self.base_url.clone(), false).await?;
        if let Ok((_, _, hidden)) = self.form_target() {
            self.hidden = hidden;
        }
        Ok(())
    }

    async fn select(&mut self, control: FormControl, value: &str) -> Result<()> {
        let name = {
            let document = self.page()?;
            let selector = self.control_selector(control)?;
            let element =
                document
                    .select(&selector)
                    .next()
                    .ok_or_else(|| AppError::ElementMissing {
                        control: control.as_str().to_string(),
                    })?;
            element
                .value()
                .attr("name")
                .or_else(|| element.value().attr("id"))
                .unwrap_or(control.as_str())
                .to_string()
        };

        let downstream = control.downstream();
        self.fields
            .retain(|(c, _, _)| *c != control && !downstream.contains(c));
        self.fields.push((control, name, value.to_string()));
        self.dirty = true;
        Ok(())
    }

    async fn options(&mut self, control: FormControl) -> Result<Vec<FormOption>> {
        if self.dirty {
            self.refresh().await?;
        }
        let document = self.page()?;
        let selector = self.control_selector(control)?;
        let element = document
            .select(&selector)
            .next()
            .ok_or_else(|| AppError::ElementMissing {
                control: control.as_str().to_string(),
            })?;
        Ok(select_options(element))
    }

    async fn submit(&mut self) -> Result<()> {
        self.refresh().await
    }

    async fn result_rows(&mut self) -> Result<Vec<ResultRow>> {
        let document = self.page()?;
        let table_selector = parse_selector(&self.site.selectors.results_table)?;
        let table = document
            .select(&table_selector)
            .next()
            .ok_or_else(|| AppError::ResultsUnavailable {
                context: format!("{} {}", self.site.name, describe_fields(&self.fields)),
            })?;
        Ok(table_rows(table))
    }

    async fn close(&mut self) -> Result<()> {
        self.page = None;
        self.fields.clear();
        log::debug!("Closed session for {}", self.site.name);
        Ok(())
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn describe_fields(fields: &[(FormControl, String, String)]) -> String {
    fields
        .iter()
        .map(|(control, _, value)| format!("{}={}", control.as_str(), value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn hidden_inputs(form: ElementRef<'_>) -> Vec<(String, String)> {
    let Ok(selector) = Selector::parse("input[type=hidden]") else {
        return Vec::new();
    };
    form.select(&selector)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or("");
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn select_options(element: ElementRef<'_>) -> Vec<FormOption> {
    let Ok(selector) = Selector::parse("option") else {
        return Vec::new();
    };
    element
        .select(&selector)
        .map(|option| {
            let label = normalize_whitespace(&option.text().collect::<String>());
            let value = option
                .value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| label.clone());
            FormOption::new(value.trim(), label)
        })
        .filter(|option| !option.is_placeholder())
        .collect()
}

fn table_rows(table: ElementRef<'_>) -> Vec<ResultRow> {
    let (Ok(row_selector), Ok(cell_selector)) = (Selector::parse("tr"), Selector::parse("td"))
    else {
        return Vec::new();
    };
    table
        .select(&row_selector)
        .map(|row| {
            ResultRow::new(
                row.select(&cell_selector)
                    .map(|cell| normalize_whitespace(&cell.text().collect::<String>())),
            )
        })
        .filter(|row| !row.cells.is_empty())
        .collect()
}
