//! Accessibility probe - walks the live DOM and returns a normalized tree.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::page::Page;
use crate::tree::{normalize_role, AccessibilityNode, AccessibilitySnapshot, Bounds, NodeState};
use crate::{Error, Result};

/// Hard budget for one probe evaluation.
pub const PROBE_BUDGET: Duration = Duration::from_secs(10);

/// JavaScript that walks the accessibility tree and serializes it.
///
/// Every element gets a `data-steer-id` attribute holding its document-order
/// backend id, so later verbs can address the exact element with
/// `//*[@data-steer-id='N']` without re-deriving a selector.
const PROBE_JS: &str = r#"
(() => {
    const ATTRS = ['id', 'class', 'href', 'type', 'placeholder', 'aria-label', 'title', 'role', 'onclick'];
    const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'META', 'LINK', 'HEAD']);
    let counter = 0;

    function accName(el) {
        const labelledBy = el.getAttribute('aria-labelledby');
        if (labelledBy) {
            const parts = labelledBy.split(/\s+/)
                .map(id => document.getElementById(id))
                .filter(Boolean)
                .map(n => n.textContent.trim());
            const joined = parts.join(' ').trim();
            if (joined) return joined;
        }
        const aria = el.getAttribute('aria-label');
        if (aria) return aria.trim();
        if (el.id) {
            const label = document.querySelector('label[for=' + JSON.stringify(el.id) + ']');
            if (label) {
                const t = label.textContent.trim();
                if (t) return t;
            }
        }
        const placeholder = el.getAttribute('placeholder');
        if (placeholder) return placeholder.trim();
        let text = (el.textContent || '').trim().replace(/\s+/g, ' ');
        if (text.length > 80) text = text.substring(0, 80);
        return text;
    }

    function roleOf(el) {
        const explicit = el.getAttribute('role');
        if (explicit) return explicit.trim().toLowerCase();
        const tag = el.tagName.toLowerCase();
        switch (tag) {
            case 'a': return el.hasAttribute('href') ? 'link' : 'generic';
            case 'button': return 'button';
            case 'input': {
                const t = (el.getAttribute('type') || 'text').toLowerCase();
                if (t === 'button' || t === 'submit' || t === 'reset') return 'button';
                if (t === 'checkbox') return 'checkbox';
                if (t === 'radio') return 'radio';
                if (t === 'search') return 'searchbox';
                return 'textbox';
            }
            case 'textarea': return 'textbox';
            case 'select': return el.multiple ? 'listbox' : 'combobox';
            case 'h1': case 'h2': case 'h3': case 'h4': case 'h5': case 'h6': return 'heading';
            case 'ul': case 'ol': return 'list';
            case 'li': return 'listitem';
            case 'td': case 'th': return 'cell';
            case 'tr': return 'row';
            case 'nav': return 'navigation';
            case 'main': return 'main';
            case 'header': return 'banner';
            case 'footer': return 'contentinfo';
            case 'aside': return 'complementary';
            case 'article': return 'article';
            case 'section': return 'region';
            case 'img': return 'image';
            default: return 'generic';
        }
    }

    function build(el) {
        if (SKIP.has(el.tagName)) return null;
        counter++;
        el.setAttribute('data-steer-id', String(counter));

        const rect = el.getBoundingClientRect();
        const style = getComputedStyle(el);
        const attrs = { tag: el.tagName.toLowerCase() };
        for (const name of ATTRS) {
            const v = el.getAttribute(name);
            if (v !== null && v !== '') attrs[name] = v;
        }

        const node = {
            role: roleOf(el),
            name: accName(el),
            placeholder: el.getAttribute('placeholder') || '',
            attrs,
            backendId: counter,
            x: rect.x, y: rect.y, w: rect.width, h: rect.height,
            visible: rect.width > 0 && rect.height > 0
                && style.display !== 'none' && style.visibility !== 'hidden',
            enabled: !el.disabled,
            focused: document.activeElement === el,
            checked: !!el.checked || el.getAttribute('aria-expanded') === 'true',
            children: [],
        };
        for (const child of el.children) {
            const c = build(child);
            if (c) node.children.push(c);
        }
        return node;
    }

    try {
        return JSON.stringify(build(document.body));
    } catch (e) {
        return JSON.stringify({ probeError: String(e && e.message || e) });
    }
})()
"#;

/// Helper functions injected by `ensure_page_ready`. Currently only the
/// highlight overlay; addressed by XPath like every other primitive.
pub const HELPERS_JS: &str = r#"
(() => {
    if (window.__steerHighlight) return true;
    window.__steerHighlight = (xpath) => {
        const res = document.evaluate(xpath, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
        const el = res.singleNodeValue;
        if (!el) return false;
        const rect = el.getBoundingClientRect();
        const marker = document.createElement('div');
        marker.style.cssText = 'position:fixed;pointer-events:none;z-index:2147483647;'
            + 'border:2px solid #ff5722;border-radius:2px;'
            + 'left:' + rect.x + 'px;top:' + rect.y + 'px;'
            + 'width:' + rect.width + 'px;height:' + rect.height + 'px;';
        document.body.appendChild(marker);
        setTimeout(() => marker.remove(), 2000);
        return true;
    };
    return true;
})()
"#;

#[derive(Deserialize)]
struct RawNode {
    role: String,
    name: String,
    #[serde(default)]
    placeholder: String,
    #[serde(default)]
    attrs: HashMap<String, String>,
    #[serde(rename = "backendId")]
    backend_id: i64,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    w: f64,
    #[serde(default)]
    h: f64,
    #[serde(default)]
    visible: bool,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    focused: bool,
    #[serde(default)]
    checked: bool,
    #[serde(default)]
    children: Vec<RawNode>,
}

impl RawNode {
    fn into_node(self) -> AccessibilityNode {
        AccessibilityNode {
            role: normalize_role(&self.role),
            label: self.name,
            placeholder: self.placeholder,
            selector: Some(format!("//*[@data-steer-id='{}']", self.backend_id)),
            backend_node_id: self.backend_id,
            attributes: self.attrs,
            bounds: Bounds {
                x: self.x,
                y: self.y,
                w: self.w,
                h: self.h,
            },
            state: NodeState {
                visible: self.visible,
                enabled: self.enabled,
                focused: self.focused,
                checked: self.checked,
            },
            children: self.children.into_iter().map(RawNode::into_node).collect(),
            ref_id: None,
        }
    }
}

/// Run the probe against the page and build a snapshot. All-or-nothing: a
/// failure anywhere yields an error, never a partial tree.
pub async fn acquire(page: &dyn Page) -> Result<AccessibilitySnapshot> {
    let info = page.info().await?;

    let started = Instant::now();
    let value = match tokio::time::timeout(PROBE_BUDGET, page.eval(PROBE_JS)).await {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => return Err(Error::ProbeFailed(e.to_string())),
        Err(_) => return Err(Error::ProbeTimeout),
    };

    // The probe stringifies its result; some collaborators hand back the
    // parsed object instead. Accept both.
    let raw: RawNode = match value {
        serde_json::Value::String(s) => {
            if let Ok(err) = serde_json::from_str::<ProbeError>(&s) {
                if let Some(reason) = err.probe_error {
                    return Err(Error::ProbeFailed(reason));
                }
            }
            serde_json::from_str(&s).map_err(|e| Error::SnapshotMalformed(e.to_string()))?
        }
        other => {
            serde_json::from_value(other).map_err(|e| Error::SnapshotMalformed(e.to_string()))?
        }
    };

    let snapshot = AccessibilitySnapshot {
        root: raw.into_node(),
        captured_at: Instant::now(),
        page_url: info.url,
        page_title: info.title,
    };

    debug!(
        url = %snapshot.page_url,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "accessibility probe complete"
    );

    Ok(snapshot)
}

#[derive(Deserialize)]
struct ProbeError {
    #[serde(rename = "probeError")]
    probe_error: Option<String>,
}
