use std::sync::Arc;

use civis_core::{now_ts, BridgeError, BridgeResult, ResourceBinding};
use civis_formats::{load_rows, GeoMode, NormalizeOptions, SourceRef};
use civis_hub::ResourceFetcher;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::form::{render, Form};
use crate::i18n::Translations;
use crate::state::{transition, Discovery, Effect, Event, Need, UserInput, WizardPolicy, WizardState};

/// Loads answered per call before the wizard gives up.
const MAX_HOPS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Form(Form),
    Done(ResourceBinding),
}

/// One wizard run: owns the state, the discovery memo and the fetcher that
/// answers load effects.
pub struct Wizard {
    fetcher: ResourceFetcher,
    translations: Arc<Translations>,
    policy: WizardPolicy,
    normalize: NormalizeOptions,
    state: WizardState,
    discovery: Discovery,
}

impl Wizard {
    pub fn new(fetcher: ResourceFetcher, translations: Arc<Translations>, policy: WizardPolicy) -> Self {
        Self {
            fetcher,
            translations,
            policy,
            normalize: NormalizeOptions::default(),
            state: WizardState::default(),
            discovery: Discovery::default(),
        }
    }

    pub fn with_normalize_options(mut self, opts: NormalizeOptions) -> Self {
        self.normalize = opts;
        self
    }

    pub fn state(&self) -> &WizardState { &self.state }

    pub fn form(&self) -> Form { render(&self.state, &self.discovery, &self.policy, &self.translations) }

    /// Apply one answer (or re-show the current step with `None`) and run
    /// until the machine asks to render or finishes.
    pub async fn handle(&mut self, input: Option<UserInput>) -> Outcome {
        let mut event = match input {
            Some(i) => Event::Input(i),
            None => Event::Show,
        };
        for _ in 0..MAX_HOPS {
            let (next, effect) = transition(&self.state, event, &self.discovery, &self.policy);
            self.state = next;
            match effect {
                Effect::Render => {
                    if let Some(err) = &self.state.error {
                        debug!(step = ?self.state.step, reason = err.reason(), "wizard: step error");
                    }
                    return Outcome::Form(self.form());
                }
                Effect::Finish(mut binding) => {
                    binding.created_ts = now_ts();
                    counter!("wizard_bindings_created_total", 1u64);
                    info!(resource = %binding.resource.id, format = %binding.format, entities = binding.entity_count(), "wizard: binding confirmed");
                    return Outcome::Done(binding);
                }
                Effect::Load(need) => {
                    event = match self.load(&need).await {
                        Ok(()) => Event::Loaded(need),
                        Err(e) => {
                            warn!(need = ?need, error = %e, "wizard: load failed");
                            Event::Failed(need, e)
                        }
                    };
                }
            }
        }
        warn!(step = ?self.state.step, "wizard: step did not settle");
        self.state.error = Some(BridgeError::Internal("wizard did not settle".into()));
        Outcome::Form(self.form())
    }

    async fn load(&mut self, need: &Need) -> BridgeResult<()> {
        let lang = self.state.language;
        self.discovery.for_language(lang);
        let fetcher = self.fetcher.with_language(lang);
        match need {
            Need::Groups => {
                let mut groups = fetcher.group_list().await?;
                for g in &mut groups {
                    for l in civis_core::Language::ALL {
                        if let Some(label) = self.translations.group_label(l, &g.name) {
                            g.localized.insert(l.code().to_string(), label);
                        }
                    }
                }
                debug!(count = groups.len(), "wizard: groups loaded");
                self.discovery.store_groups(groups);
            }
            Need::Packages(group) => {
                let packages = fetcher.group_packages(group).await?;
                debug!(group = %group, count = packages.len(), "wizard: packages loaded");
                self.discovery.store_packages(group, packages);
            }
            Need::Resources(package) => {
                let resources = fetcher.package_resources(package).await?;
                debug!(package = %package, count = resources.len(), "wizard: resources loaded");
                self.discovery.store_resources(package, resources);
            }
            Need::Rows(sel) => {
                let source = SourceRef { format: sel.format, url: &sel.url, layer: &sel.resource.name };
                let rows = load_rows(&fetcher, source, GeoMode::Graceful, &self.normalize).await?;
                self.discovery.store_rows(&sel.url, rows);
            }
        }
        Ok(())
    }
}
