//! Harvester and pagination state machine.
//!
//! [`Harvester`] owns the transport for one repository endpoint and exposes
//! every protocol verb. List verbs return a [`Paginator`], a single-pass,
//! pull-based cursor that walks resumption tokens one page at a time:
//!
//! ```text
//! Initial --(selection params)--> Paging --(token only)--> Paging ... --> Done
//! ```
//!
//! No page is fetched before the caller has consumed the previous one, and
//! dropping the paginator stops the harvest without issuing further requests.

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::HarvesterConfig;
use crate::executor::RequestExecutor;
use crate::harvest::dates::validate_date_range;
use crate::harvest::parser::OaiParser;
use crate::harvest::traits::{
    HarvestError, ListIdentifiers, ListMetadataFormats, ListOptions, ListRecords, ListSets,
    ListVerb, PageWarning, ResponseError, TransportError, ValidationError, Verb,
};
use crate::model::{Identify, ListPage, MetadataFormat, Record, RecordSet, ResumptionInfo, SetInfo};
use crate::traits::{HttpResponse, Transport};
use crate::transport::ReqwestTransport;

type Params = Vec<(String, String)>;

fn params(verb: Verb) -> Params {
    vec![("verb".to_string(), verb.as_str().to_string())]
}

fn push(params: &mut Params, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        params.push((name.to_string(), value.to_string()));
    }
}

fn token_params(verb: Verb, token: &str) -> Params {
    let mut p = params(verb);
    push(&mut p, "resumptionToken", Some(token));
    p
}

// ============================================================================
// Page Results
// ============================================================================

/// A single page fetched on the caller's request, plus any warning raised
/// while building that request.
#[derive(Debug, Clone)]
pub struct PageResult<T> {
    pub page: ListPage<T>,
    pub warning: Option<PageWarning>,
}

/// Raw response of a hand-built request.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Parameters that were sent
    pub params: Vec<(String, String)>,
    pub status: u16,
    pub body: String,
    parser: OaiParser,
}

impl RawResponse {
    /// Parses the body as a record page.
    pub fn records(&self) -> Result<RecordSet, HarvestError> {
        self.parser.parse_records(&self.body)
    }
}

// ============================================================================
// Paginator
// ============================================================================

#[derive(Debug)]
enum PagingState {
    /// Nothing sent yet; holds the original selection parameters
    Initial(Params),
    /// Last page carried this token
    Paging(String),
    Done,
}

/// Lazy, single-use sequence over a paged list verb.
///
/// Call [`Paginator::next`] until it returns `None`. After an error the
/// sequence is finished; a new harvest has to be started to try again.
pub struct Paginator<'h, V: ListVerb> {
    harvester: &'h Harvester,
    state: PagingState,
    buffer: std::vec::IntoIter<V::Item>,
    pages_fetched: usize,
    last_resumption: Option<ResumptionInfo>,
    _verb: PhantomData<V>,
}

impl<'h, V: ListVerb> Paginator<'h, V> {
    fn new(harvester: &'h Harvester, initial: Params) -> Self {
        Self {
            harvester,
            state: PagingState::Initial(initial),
            buffer: Vec::new().into_iter(),
            pages_fetched: 0,
            last_resumption: None,
            _verb: PhantomData,
        }
    }

    /// Next item, fetching the next page only when the current one is used up.
    pub async fn next(&mut self) -> Option<Result<V::Item, HarvestError>> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(Ok(item));
            }

            let request = match std::mem::replace(&mut self.state, PagingState::Done) {
                PagingState::Done => return None,
                PagingState::Initial(initial) => initial,
                PagingState::Paging(token) => token_params(V::VERB, &token),
            };

            match self.harvester.fetch_page::<V>(request).await {
                Ok(page) => {
                    self.pages_fetched += 1;
                    if let Some(token) = page.resumption_token() {
                        self.state = PagingState::Paging(token.to_string());
                    }
                    self.last_resumption = Some(page.resumption.clone());
                    self.buffer = page.items.into_iter();
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Drains the sequence, stopping at the first error.
    pub async fn try_collect(mut self) -> Result<Vec<V::Item>, HarvestError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    /// Number of requests that returned a page so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Pagination info of the most recent page, for progress display.
    pub fn progress(&self) -> Option<&ResumptionInfo> {
        self.last_resumption.as_ref()
    }

    /// True once no further request will be made.
    pub fn is_done(&self) -> bool {
        matches!(self.state, PagingState::Done) && self.buffer.len() == 0
    }
}

/// Lazy record sequence returned by [`Harvester::list_records`].
pub type RecordStream<'h> = Paginator<'h, ListRecords>;

// ============================================================================
// Harvester
// ============================================================================

/// Client for one OAI-PMH endpoint.
///
/// # Example
///
/// ```ignore
/// use oai_harvester::{Harvester, HarvesterConfig, ListOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let harvester = Harvester::new(HarvesterConfig::new("https://repo.example.org/oai"))?;
///     let mut records = harvester.list_records(&ListOptions::new("oai_dc"))?;
///     while let Some(record) = records.next().await {
///         let record = record?;
///         println!("{} {:?}", record.identifier(), record.title());
///     }
///     Ok(())
/// }
/// ```
pub struct Harvester {
    executor: RequestExecutor,
    parser: OaiParser,
}

impl Harvester {
    /// Creates a harvester using the `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Fails on an invalid base URL or if the HTTP client cannot be built.
    pub fn new(config: HarvesterConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.timeout()).map_err(|source| TransportError {
            attempts: 0,
            source,
        })?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Creates a harvester over a caller-supplied transport.
    pub fn with_transport(
        config: HarvesterConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        let parser = OaiParser::new().with_preserve_raw(config.preserve_raw);
        Ok(Self {
            executor: RequestExecutor::new(&config, transport),
            parser,
        })
    }

    pub fn base_url(&self) -> &str {
        self.executor.base_url()
    }

    /// Releases the transport.
    pub fn close(self) {
        debug!(url = self.executor.base_url(), "Closing harvester");
    }

    #[instrument(skip_all, fields(verb = %V::VERB))]
    async fn fetch_page<V: ListVerb>(
        &self,
        request: Params,
    ) -> Result<ListPage<V::Item>, HarvestError> {
        let response = self.executor.execute(request).await?;
        let page = V::parse_page(&self.parser, &response.body)?;
        info!(
            items = page.len(),
            has_more = page.has_more(),
            complete_list_size = page.complete_list_size(),
            cursor = page.cursor(),
            "Fetched page"
        );
        Ok(page)
    }

    /// Builds the first request of a selective harvest, validating it first.
    fn selection_params(verb: Verb, options: &ListOptions) -> Result<Params, ValidationError> {
        if options.metadata_prefix.trim().is_empty() {
            return Err(ValidationError::MissingParameter("metadata_prefix"));
        }
        validate_date_range(options.from.as_deref(), options.until.as_deref())?;

        let mut p = params(verb);
        push(&mut p, "metadataPrefix", Some(&options.metadata_prefix));
        push(&mut p, "set", options.set.as_deref());
        push(&mut p, "from", options.from.as_deref());
        push(&mut p, "until", options.until.as_deref());
        Ok(p)
    }

    /// Token-only request; reports any selection filters it had to ignore.
    fn resume_params(
        verb: Verb,
        token: &str,
        options: &ListOptions,
    ) -> (Params, Option<PageWarning>) {
        let ignored = options.active_filters();
        let warning = if ignored.is_empty() {
            None
        } else {
            warn!(
                verb = %verb,
                ignored = ?ignored,
                "Resumption token provided; selection filters ignored"
            );
            Some(PageWarning::TokenOverridesFilters { ignored })
        };
        (token_params(verb, token), warning)
    }

    // ------------------------------------------------------------------------
    // Verbs
    // ------------------------------------------------------------------------

    /// `Identify`: repository description.
    pub async fn identify(&self) -> Result<Identify, HarvestError> {
        let response = self.executor.execute(params(Verb::Identify)).await?;
        self.parser.parse_identify(&response.body)
    }

    /// `ListRecords` over every page.
    ///
    /// # Errors
    ///
    /// Input is validated here, before any request: an empty metadata prefix
    /// or a bad `from`/`until` pair fails immediately.
    pub fn list_records(&self, options: &ListOptions) -> Result<RecordStream<'_>, HarvestError> {
        let initial = Self::selection_params(Verb::ListRecords, options)?;
        Ok(Paginator::new(self, initial))
    }

    /// `ListIdentifiers` over every page; records carry headers only.
    pub fn list_identifiers(
        &self,
        options: &ListOptions,
    ) -> Result<Paginator<'_, ListIdentifiers>, HarvestError> {
        let initial = Self::selection_params(Verb::ListIdentifiers, options)?;
        Ok(Paginator::new(self, initial))
    }

    /// `ListSets` over every page.
    pub fn list_sets(&self) -> Paginator<'_, ListSets> {
        Paginator::new(self, params(Verb::ListSets))
    }

    /// `ListMetadataFormats` over every page, optionally for one item.
    pub fn list_metadata_formats(
        &self,
        identifier: Option<&str>,
    ) -> Paginator<'_, ListMetadataFormats> {
        let mut p = params(Verb::ListMetadataFormats);
        push(&mut p, "identifier", identifier);
        Paginator::new(self, p)
    }

    /// A single `ListRecords` page.
    ///
    /// With a token, only the token is sent; any filters in `options` are
    /// ignored and reported through [`PageResult::warning`]. Without one, the
    /// options are validated as for [`Harvester::list_records`].
    pub async fn list_records_page(
        &self,
        options: &ListOptions,
        resumption_token: Option<&str>,
    ) -> Result<PageResult<Record>, HarvestError> {
        let (request, warning) = match resumption_token.filter(|t| !t.is_empty()) {
            Some(token) => Self::resume_params(Verb::ListRecords, token, options),
            None => (Self::selection_params(Verb::ListRecords, options)?, None),
        };
        let page = self.fetch_page::<ListRecords>(request).await?;
        Ok(PageResult { page, warning })
    }

    /// Next `ListRecords` page for a token from a previous page.
    pub async fn resume(&self, resumption_token: &str) -> Result<RecordSet, HarvestError> {
        if resumption_token.is_empty() {
            return Err(ValidationError::MissingParameter("resumption_token").into());
        }
        self.fetch_page::<ListRecords>(token_params(Verb::ListRecords, resumption_token))
            .await
    }

    /// A single `ListSets` page.
    pub async fn list_sets_page(
        &self,
        resumption_token: Option<&str>,
    ) -> Result<ListPage<SetInfo>, HarvestError> {
        let request = match resumption_token.filter(|t| !t.is_empty()) {
            Some(token) => token_params(Verb::ListSets, token),
            None => params(Verb::ListSets),
        };
        self.fetch_page::<ListSets>(request).await
    }

    /// A single `ListMetadataFormats` page. A token takes precedence over
    /// `identifier`.
    pub async fn list_metadata_formats_page(
        &self,
        identifier: Option<&str>,
        resumption_token: Option<&str>,
    ) -> Result<ListPage<MetadataFormat>, HarvestError> {
        let request = match resumption_token.filter(|t| !t.is_empty()) {
            Some(token) => token_params(Verb::ListMetadataFormats, token),
            None => {
                let mut p = params(Verb::ListMetadataFormats);
                push(&mut p, "identifier", identifier);
                p
            }
        };
        self.fetch_page::<ListMetadataFormats>(request).await
    }

    /// `GetRecord`: one record by identifier.
    ///
    /// # Errors
    ///
    /// [`ResponseError::RecordNotFound`] if the response holds no record.
    pub async fn get_record(
        &self,
        identifier: &str,
        metadata_prefix: &str,
    ) -> Result<Record, HarvestError> {
        if identifier.is_empty() {
            return Err(ValidationError::MissingParameter("identifier").into());
        }
        if metadata_prefix.is_empty() {
            return Err(ValidationError::MissingParameter("metadata_prefix").into());
        }

        let mut p = params(Verb::GetRecord);
        push(&mut p, "identifier", Some(identifier));
        push(&mut p, "metadataPrefix", Some(metadata_prefix));

        let response = self.executor.execute(p).await?;
        self.parser
            .parse_records(&response.body)?
            .into_iter()
            .next()
            .ok_or_else(|| ResponseError::RecordNotFound(identifier.to_string()).into())
    }

    /// Sends arbitrary parameters and returns the raw response.
    pub async fn harvest_raw(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<RawResponse, HarvestError> {
        let HttpResponse { status, body, .. } = self.executor.execute(params.clone()).await?;
        Ok(RawResponse {
            params,
            status,
            body,
            parser: self.parser.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
