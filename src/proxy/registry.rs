use std::collections::{BTreeMap, HashMap};

use crate::storage::ProxyScoreRecord;
use crate::util::now_ms;

use super::scoring::{rebase, ProxyStat, REBASE_INTERVAL_MS};

/// Cooldown window after a proxy returns 5xx/429 or a transport failure.
pub(crate) const PROXY_COOLDOWN_MS: i64 = 120_000;

/// How a named proxy wraps the target URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// Percent-encoded target appended to the base.
    ParamEnc,
    /// Target concatenated after the base, scheme normalized.
    Prefix,
}

#[derive(Debug, Clone)]
pub struct NamedProxy {
    pub name: String,
    pub kind: ProxyKind,
    pub base: String,
    /// Some proxies cache aggressively; this adds a timestamp parameter on
    /// every request through them.
    pub cache_bust: bool,
}

impl NamedProxy {
    pub fn new(name: &str, kind: ProxyKind, base: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            base: base.to_string(),
            cache_bust: false,
        }
    }

    pub fn wrap(&self, target: &str, now_ms: i64) -> String {
        let mut url = match self.kind {
            ProxyKind::ParamEnc => format!("{}{}", self.base, urlencoding::encode(target)),
            ProxyKind::Prefix => format!("{}{}", self.base, normalize_scheme(target)),
        };
        if self.cache_bust {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str(&format!("t={now_ms}"));
        }
        url
    }
}

/// One way of reaching a feed URL. Manual templates are user-supplied and
/// never scored; `Direct` is the bare feed URL with no proxy at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyCandidate {
    Manual(String),
    Named(String),
    Direct,
}

impl ProxyCandidate {
    pub fn label(&self) -> &str {
        match self {
            ProxyCandidate::Manual(_) => "manual",
            ProxyCandidate::Named(name) => name,
            ProxyCandidate::Direct => "direct",
        }
    }
}

/// Public CORS proxies shipped as defaults. Illustrative configuration,
/// not a protocol: any of these can disappear, which is exactly why the
/// registry scores and rotates them.
pub fn builtin_proxies() -> Vec<NamedProxy> {
    vec![
        // Returns a {"contents": ...} JSON envelope; the refresh loop unwraps it.
        NamedProxy::new(
            "allorigins",
            ProxyKind::ParamEnc,
            "https://api.allorigins.win/get?url=",
        ),
        NamedProxy::new("corsproxy-io", ProxyKind::ParamEnc, "https://corsproxy.io/?url="),
        NamedProxy {
            cache_bust: true,
            ..NamedProxy::new(
                "codetabs",
                ProxyKind::ParamEnc,
                "https://api.codetabs.com/v1/proxy?quest=",
            )
        },
        NamedProxy::new(
            "isomorphic-git",
            ProxyKind::Prefix,
            "https://cors.isomorphic-git.org/",
        ),
    ]
}

/// Registry of proxy templates plus their health statistics. Candidate
/// ordering is a score snapshot taken at the start of a refresh; results
/// recorded mid-flight never re-sort an in-flight list.
pub struct ProxyRegistry {
    proxies: Vec<NamedProxy>,
    manual: Option<String>,
    stats: HashMap<String, ProxyStat>,
    disabled_until: HashMap<String, i64>,
    last_rebase_ms: i64,
}

impl ProxyRegistry {
    pub fn new(manual: Option<String>) -> Self {
        Self::with_proxies(builtin_proxies(), manual)
    }

    pub fn with_proxies(proxies: Vec<NamedProxy>, manual: Option<String>) -> Self {
        Self {
            proxies,
            manual,
            stats: HashMap::new(),
            disabled_until: HashMap::new(),
            last_rebase_ms: now_ms(),
        }
    }

    pub fn set_manual(&mut self, manual: Option<String>) {
        self.manual = manual;
    }

    pub fn proxy(&self, name: &str) -> Option<&NamedProxy> {
        self.proxies.iter().find(|p| p.name == name)
    }

    /// Restores persisted statistics. Entries for proxies that are no
    /// longer registered are dropped.
    pub fn restore(&mut self, scores: &BTreeMap<String, ProxyScoreRecord>, reset_at: i64) {
        self.stats = scores
            .iter()
            .filter(|(name, _)| self.proxies.iter().any(|p| &p.name == *name))
            .map(|(name, record)| (name.clone(), ProxyStat::from_record(record)))
            .collect();
        if reset_at > 0 {
            self.last_rebase_ms = reset_at;
        }
    }

    pub fn export(&self) -> (BTreeMap<String, ProxyScoreRecord>, i64) {
        let scores = self
            .stats
            .iter()
            .map(|(name, stat)| (name.clone(), stat.to_record()))
            .collect();
        (scores, self.last_rebase_ms)
    }

    /// Candidate list for one refresh: the manual template first if
    /// configured, then named proxies not on cooldown, best score first.
    pub fn candidates(&mut self) -> Vec<ProxyCandidate> {
        self.candidates_at(now_ms())
    }

    pub(crate) fn candidates_at(&mut self, now_ms: i64) -> Vec<ProxyCandidate> {
        self.maybe_rebase(now_ms);

        let mut named: Vec<(&str, f64)> = self
            .proxies
            .iter()
            .filter(|p| !self.is_disabled_at(&p.name, now_ms))
            .map(|p| {
                let score = self.stats.get(&p.name).map(|s| s.score).unwrap_or(0.0);
                (p.name.as_str(), score)
            })
            .collect();
        named.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut out = Vec::with_capacity(named.len() + 1);
        if let Some(template) = &self.manual {
            out.push(ProxyCandidate::Manual(template.clone()));
        }
        out.extend(
            named
                .into_iter()
                .map(|(name, _)| ProxyCandidate::Named(name.to_string())),
        );
        out
    }

    /// Records a fetch result for a named proxy. Manual and direct
    /// candidates carry no statistics and are ignored here.
    pub fn record_result(&mut self, name: &str, ok: bool) {
        self.record_result_at(name, ok, now_ms());
    }

    pub(crate) fn record_result_at(&mut self, name: &str, ok: bool, now_ms: i64) {
        if !self.proxies.iter().any(|p| p.name == name) {
            return;
        }
        self.stats
            .entry(name.to_string())
            .or_default()
            .record(ok, now_ms);
    }

    /// Takes a proxy out of rotation for the cooldown window.
    pub fn disable(&mut self, name: &str) {
        self.disable_at(name, now_ms());
    }

    pub(crate) fn disable_at(&mut self, name: &str, now_ms: i64) {
        self.disabled_until
            .insert(name.to_string(), now_ms + PROXY_COOLDOWN_MS);
    }

    fn is_disabled_at(&self, name: &str, now_ms: i64) -> bool {
        self.disabled_until
            .get(name)
            .is_some_and(|&until| until > now_ms)
    }

    fn maybe_rebase(&mut self, now_ms: i64) {
        if now_ms.saturating_sub(self.last_rebase_ms) < REBASE_INTERVAL_MS {
            return;
        }
        for proxy in &self.proxies {
            self.stats.entry(proxy.name.clone()).or_default();
        }
        rebase(&mut self.stats, now_ms);
        self.last_rebase_ms = now_ms;
        tracing::info!("Proxy scores rebased");
    }

    /// Builds the URL actually fetched for a candidate.
    pub fn build_url(&self, candidate: &ProxyCandidate, target: &str) -> String {
        match candidate {
            ProxyCandidate::Direct => target.to_string(),
            ProxyCandidate::Manual(template) => build_manual_url(template, target),
            ProxyCandidate::Named(name) => match self.proxy(name) {
                Some(proxy) => proxy.wrap(target, now_ms()),
                None => target.to_string(),
            },
        }
    }
}

/// Manual templates come in three spellings: `%s` substitution, append
/// after a trailing `=` (e.g. `...?url=`), or plain prefix.
fn build_manual_url(template: &str, target: &str) -> String {
    let template = template.trim();
    if template.contains("%s") {
        template.replace("%s", &urlencoding::encode(target))
    } else if template.ends_with('=') {
        format!("{template}{}", urlencoding::encode(target))
    } else {
        format!("{template}{}", normalize_scheme(target))
    }
}

fn normalize_scheme(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else if let Some(rest) = target.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{target}")
    }
}
