//! Element indexing.
//!
//! A bootstrap script is injected into the page on every call. It installs
//! `window.__pilot` once per document and exposes index-addressed helpers that
//! answer with `{ok, value}` or `{ok: false, code, message}`. Each indexing
//! pass gets a pass number from the driver; helpers reject calls that name an
//! older pass, so indices from two snapshots can never be mixed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::config::IndexerConfig;
use crate::error::DriverError;

/// Never rendered, never indexed, never descended into.
pub const SKIP_TAGS: &[&str] = &[
    "script", "style", "meta", "link", "title", "head", "noscript",
];

pub const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "summary", "details", "option", "label",
];

pub const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "checkbox",
    "radio",
    "tab",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "option",
    "switch",
    "textbox",
    "searchbox",
    "combobox",
    "listbox",
    "slider",
    "spinbutton",
    "treeitem",
];

pub const HANDLER_ATTRIBUTES: &[&str] = &[
    "onclick",
    "onmousedown",
    "onmouseup",
    "onkeydown",
    "onkeyup",
    "onkeypress",
];

pub const POINTER_CURSORS: &[&str] = &["pointer", "text", "grab", "grabbing", "move"];

/// Attributes copied into each [`ElementRecord`].
pub const KEPT_ATTRIBUTES: &[&str] = &[
    "id",
    "type",
    "name",
    "role",
    "href",
    "value",
    "placeholder",
    "aria-label",
    "title",
    "alt",
    "checked",
    "disabled",
];

const BOOTSTRAP_TEMPLATE: &str = r#"
(() => {
  const CONFIG = __PILOT_CONFIG__;
  if (window.__pilot && window.__pilot.version === CONFIG.version) return;

  const OVERLAY_ID = '__pilot_overlay';
  const COLORS = ['#e6194b', '#3cb44b', '#4363d8', '#f58231', '#911eb4', '#42d4f4', '#f032e6', '#469990'];
  const state = { pass: -1, paths: [] };

  function fail(code, message) {
    const err = new Error(message);
    err.pilotCode = code;
    return err;
  }

  function styleOf(cache, el) {
    let s = cache.styles.get(el);
    if (!s) { s = window.getComputedStyle(el); cache.styles.set(el, s); }
    return s;
  }

  function rectOf(cache, el) {
    let r = cache.rects.get(el);
    if (!r) { r = el.getBoundingClientRect(); cache.rects.set(el, r); }
    return r;
  }

  function isVisible(cache, el, viewportOnly) {
    const r = rectOf(cache, el);
    if (r.width <= 0 || r.height <= 0) return false;
    const s = styleOf(cache, el);
    if (s.display === 'none' || s.visibility === 'hidden' || parseFloat(s.opacity) === 0) return false;
    if (!viewportOnly) return true;
    return r.bottom > 0 && r.right > 0 && r.top < window.innerHeight && r.left < window.innerWidth;
  }

  function isInteractive(cache, el) {
    const tag = el.tagName.toLowerCase();
    if (CONFIG.interactiveTags.includes(tag)) return true;
    const role = (el.getAttribute('role') || '').toLowerCase();
    if (role && CONFIG.interactiveRoles.includes(role)) return true;
    for (const attr of CONFIG.handlerAttributes) {
      if (el.hasAttribute(attr)) return true;
    }
    const editable = el.getAttribute('contenteditable');
    if (editable !== null && editable !== 'false') return true;
    const cursor = styleOf(cache, el).cursor;
    if (CONFIG.pointerCursors.includes(cursor)) {
      const parent = el.parentElement;
      return !parent || styleOf(cache, parent).cursor !== cursor;
    }
    return false;
  }

  function escapeIdent(v) {
    if (window.CSS && CSS.escape) return CSS.escape(v);
    return v.replace(/[^a-zA-Z0-9_-]/g, '\\$&');
  }

  function isUnique(selector, el) {
    try {
      const found = document.querySelectorAll(selector);
      return found.length === 1 && found[0] === el;
    } catch (e) {
      return false;
    }
  }

  function pathOf(el) {
    const tag = el.tagName.toLowerCase();
    if (el.id) {
      const sel = '#' + escapeIdent(el.id);
      if (isUnique(sel, el)) return sel;
    }
    const classes = Array.from(el.classList).filter(c => c && !c.startsWith('__pilot'));
    if (classes.length) {
      const sel = tag + classes.map(c => '.' + escapeIdent(c)).join('');
      if (isUnique(sel, el)) return sel;
    }
    for (const attr of Array.from(el.attributes)) {
      if (!attr.name.startsWith('data-')) continue;
      const sel = tag + '[' + attr.name + '="' + attr.value.replace(/["\\]/g, '\\$&') + '"]';
      if (isUnique(sel, el)) return sel;
    }
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1 && node !== document.documentElement) {
      const parent = node.parentElement;
      if (!parent) break;
      const position = Array.prototype.indexOf.call(parent.children, node) + 1;
      parts.unshift(node.tagName.toLowerCase() + ':nth-child(' + position + ')');
      node = parent;
    }
    parts.unshift('html');
    return parts.join(' > ');
  }

  function clip(text, limit) {
    const flat = (text || '').replace(/\s+/g, ' ').trim();
    return flat.length > limit ? flat.slice(0, limit) + '...' : flat;
  }

  function textOf(el, limit) {
    const tag = el.tagName.toLowerCase();
    let text = '';
    if (tag === 'input' || tag === 'textarea') {
      text = el.value || el.placeholder || '';
    } else if (tag === 'select') {
      const opt = el.options[el.selectedIndex];
      text = opt ? opt.text : '';
    } else {
      text = el.innerText || el.textContent || '';
    }
    if (!text.trim()) {
      text = el.getAttribute('aria-label') || el.getAttribute('title') || el.getAttribute('alt') || '';
    }
    return clip(text, limit);
  }

  function attributesOf(el) {
    const out = {};
    for (const name of CONFIG.keptAttributes) {
      const v = el.getAttribute(name);
      if (v !== null) out[name] = clip(v, 80);
    }
    return out;
  }

  function clearOverlay() {
    const existing = document.getElementById(OVERLAY_ID);
    if (existing) existing.remove();
  }

  function drawOverlay(elements) {
    const root = document.createElement('div');
    root.id = OVERLAY_ID;
    root.style.cssText = 'position:fixed;top:0;left:0;width:0;height:0;pointer-events:none;z-index:2147483647;';
    for (const e of elements) {
      const color = COLORS[e.index % COLORS.length];
      const box = document.createElement('div');
      box.style.cssText = 'position:fixed;box-sizing:border-box;pointer-events:none;border:2px solid ' + color +
        ';left:' + e.rect.x + 'px;top:' + e.rect.y + 'px;width:' + e.rect.width + 'px;height:' + e.rect.height + 'px;';
      const label = document.createElement('span');
      label.textContent = String(e.index);
      label.style.cssText = 'position:absolute;top:-2px;right:-2px;background:' + color +
        ';color:#fff;font:bold 11px monospace;padding:0 3px;border-radius:2px;';
      box.appendChild(label);
      root.appendChild(box);
    }
    (document.body || document.documentElement).appendChild(root);
  }

  function index(opts) {
    const cache = { styles: new Map(), rects: new Map() };
    clearOverlay();
    const elements = [];
    const paths = [];
    function walk(node, depth) {
      if (depth > opts.maxDepth) return;
      for (const child of node.children) {
        const tag = child.tagName.toLowerCase();
        if (CONFIG.skipTags.includes(tag) || child.id === OVERLAY_ID) continue;
        if (styleOf(cache, child).display === 'none') continue;
        if (isVisible(cache, child, opts.viewportOnly) && isInteractive(cache, child)) {
          const r = rectOf(cache, child);
          const path = pathOf(child);
          paths.push(path);
          elements.push({
            index: elements.length,
            tag: tag,
            path: path,
            rect: { x: r.left, y: r.top, width: r.width, height: r.height },
            visible: true,
            interactive: true,
            text: textOf(child, opts.textLimit),
            attributes: attributesOf(child),
          });
        }
        walk(child, depth + 1);
      }
    }
    walk(document.documentElement, 0);
    state.pass = opts.pass;
    state.paths = paths;
    if (opts.highlight) drawOverlay(elements);
    return {
      pass: opts.pass,
      url: location.href,
      title: document.title,
      viewport: {
        width: window.innerWidth,
        height: window.innerHeight,
        scrollX: window.scrollX,
        scrollY: window.scrollY,
        pageHeight: document.documentElement.scrollHeight,
      },
      elements: elements,
    };
  }

  function resolve(pass, i) {
    if (pass !== state.pass) {
      throw fail('stale', 'snapshot ' + pass + ' is no longer current (page is at pass ' + state.pass + ')');
    }
    const path = state.paths[i];
    if (path === undefined) throw fail('not_found', 'index ' + i + ' is not in the snapshot');
    let el = null;
    try { el = document.querySelector(path); } catch (e) { el = null; }
    if (!el) throw fail('not_found', 'element ' + i + ' (' + path + ') is no longer in the page');
    return el;
  }

  function emit(el, type) {
    el.dispatchEvent(new Event(type, { bubbles: true }));
  }

  function click(pass, i) {
    const el = resolve(pass, i);
    el.scrollIntoView({ block: 'center', inline: 'center' });
    if (typeof el.focus === 'function') el.focus();
    el.click();
    return { tag: el.tagName.toLowerCase(), text: textOf(el, 60) };
  }

  function fill(pass, i, value) {
    const el = resolve(pass, i);
    const tag = el.tagName.toLowerCase();
    el.scrollIntoView({ block: 'center' });
    if (typeof el.focus === 'function') el.focus();
    if (tag === 'input' || tag === 'textarea') {
      const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value');
      if (desc && desc.set) desc.set.call(el, value); else el.value = value;
      emit(el, 'input');
      emit(el, 'change');
      return el.value;
    }
    if (el.isContentEditable) {
      el.textContent = value;
      emit(el, 'input');
      return el.textContent;
    }
    throw fail('invalid', 'element ' + i + ' <' + tag + '> is not editable');
  }

  function extract(pass, i, limit) {
    const el = resolve(pass, i);
    const tag = el.tagName.toLowerCase();
    const raw = (tag === 'input' || tag === 'textarea' || tag === 'select') ? el.value : (el.innerText || el.textContent);
    const text = (raw || '').trim();
    return text.length > limit ? text.slice(0, limit) : text;
  }

  function optionNodes(el) {
    if (el.tagName.toLowerCase() === 'select') return null;
    const nodes = Array.from(el.querySelectorAll('[role="option"]'));
    const owned = el.getAttribute('aria-controls') || el.getAttribute('aria-owns');
    if (!nodes.length && owned) {
      const target = document.getElementById(owned);
      if (target) return Array.from(target.querySelectorAll('[role="option"]'));
    }
    return nodes;
  }

  function options(pass, i) {
    const el = resolve(pass, i);
    if (el.tagName.toLowerCase() === 'select') {
      return Array.from(el.options).map((o, n) => ({ index: n, text: o.text.trim(), value: o.value, selected: o.selected }));
    }
    const nodes = optionNodes(el);
    if (!nodes.length) throw fail('invalid', 'element ' + i + ' is not a dropdown');
    return nodes.map((o, n) => ({
      index: n,
      text: clip(o.innerText || o.textContent, 100),
      value: o.getAttribute('data-value') || o.getAttribute('value') || '',
      selected: o.getAttribute('aria-selected') === 'true',
    }));
  }

  function pick(items, wanted) {
    const lower = wanted.toLowerCase();
    return items.find(o => o.text === wanted)
      || items.find(o => o.value === wanted)
      || items.find(o => o.text.toLowerCase() === lower)
      || items.find(o => o.text.toLowerCase().includes(lower));
  }

  function select(pass, i, wanted) {
    const el = resolve(pass, i);
    const available = options(pass, i);
    const match = pick(available, wanted);
    if (!match) {
      throw fail('option_not_found', wanted);
    }
    if (el.tagName.toLowerCase() === 'select') {
      el.selectedIndex = match.index;
      emit(el, 'input');
      emit(el, 'change');
    } else {
      optionNodes(el)[match.index].click();
    }
    return match.text;
  }

  function scrollPercent(percent) {
    const max = Math.max(0, document.documentElement.scrollHeight - window.innerHeight);
    window.scrollTo(0, Math.round(max * percent / 100));
    return window.scrollY;
  }

  function scrollEdge(top) {
    window.scrollTo(0, top ? 0 : document.documentElement.scrollHeight);
    return window.scrollY;
  }

  function scrollText(text, occurrence) {
    const needle = text.toLowerCase();
    const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT);
    let seen = 0;
    while (walker.nextNode()) {
      const node = walker.currentNode;
      const hay = (node.nodeValue || '').toLowerCase();
      let from = 0;
      while (needle && (from = hay.indexOf(needle, from)) !== -1) {
        seen += 1;
        if (seen === occurrence && node.parentElement) {
          node.parentElement.scrollIntoView({ block: 'center' });
          return window.scrollY;
        }
        from += needle.length;
      }
    }
    throw fail('text_not_found', text);
  }

  const api = {
    index: index,
    click: click,
    fill: fill,
    extract: extract,
    options: options,
    select: select,
    scrollPercent: scrollPercent,
    scrollEdge: scrollEdge,
    scrollText: scrollText,
    clear: function () { clearOverlay(); return true; },
  };

  function call(name, args) {
    try {
      return { ok: true, value: api[name].apply(null, args) };
    } catch (e) {
      return { ok: false, code: (e && e.pilotCode) || 'error', message: String((e && e.message) || e) };
    }
  }

  window.__pilot = { version: CONFIG.version, call: call };
})();
"#;

static BOOTSTRAP: LazyLock<String> = LazyLock::new(|| {
    let config = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "skipTags": SKIP_TAGS,
        "interactiveTags": INTERACTIVE_TAGS,
        "interactiveRoles": INTERACTIVE_ROLES,
        "handlerAttributes": HANDLER_ATTRIBUTES,
        "pointerCursors": POINTER_CURSORS,
        "keptAttributes": KEPT_ATTRIBUTES,
    });
    BOOTSTRAP_TEMPLATE.replace("__PILOT_CONFIG__", &config.to_string())
});

/// Per-pass indexing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub highlight: bool,
    pub viewport_only: bool,
    pub max_depth: usize,
    pub text_limit: usize,
}

impl From<&IndexerConfig> for IndexOptions {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            highlight: config.highlight,
            viewport_only: config.viewport_only,
            max_depth: config.max_depth,
            text_limit: config.text_limit,
        }
    }
}

/// One call into the injected page helper.
#[derive(Debug, Clone, PartialEq)]
pub enum PageCall {
    Index { pass: u64, options: IndexOptions },
    Click { pass: u64, index: usize },
    Fill { pass: u64, index: usize, value: String },
    Extract { pass: u64, index: usize, limit: usize },
    Options { pass: u64, index: usize },
    Select { pass: u64, index: usize, option: String },
    ScrollPercent(u8),
    ScrollEdge { top: bool },
    ScrollText { text: String, occurrence: usize },
    ClearOverlay,
}

impl PageCall {
    pub fn name(&self) -> &'static str {
        match self {
            PageCall::Index { .. } => "index",
            PageCall::Click { .. } => "click",
            PageCall::Fill { .. } => "fill",
            PageCall::Extract { .. } => "extract",
            PageCall::Options { .. } => "options",
            PageCall::Select { .. } => "select",
            PageCall::ScrollPercent(_) => "scrollPercent",
            PageCall::ScrollEdge { .. } => "scrollEdge",
            PageCall::ScrollText { .. } => "scrollText",
            PageCall::ClearOverlay => "clear",
        }
    }

    /// The element index this call addresses, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            PageCall::Click { index, .. }
            | PageCall::Fill { index, .. }
            | PageCall::Extract { index, .. }
            | PageCall::Options { index, .. }
            | PageCall::Select { index, .. } => Some(*index),
            _ => None,
        }
    }

    fn args(&self) -> Value {
        match self {
            PageCall::Index { pass, options } => json!([{
                "pass": pass,
                "highlight": options.highlight,
                "viewportOnly": options.viewport_only,
                "maxDepth": options.max_depth,
                "textLimit": options.text_limit,
            }]),
            PageCall::Click { pass, index } | PageCall::Options { pass, index } => {
                json!([pass, index])
            }
            PageCall::Fill { pass, index, value } => json!([pass, index, value]),
            PageCall::Extract { pass, index, limit } => json!([pass, index, limit]),
            PageCall::Select {
                pass,
                index,
                option,
            } => json!([pass, index, option]),
            PageCall::ScrollPercent(percent) => json!([percent]),
            PageCall::ScrollEdge { top } => json!([top]),
            PageCall::ScrollText { text, occurrence } => json!([text, occurrence]),
            PageCall::ClearOverlay => json!([]),
        }
    }

    /// Self-contained expression evaluating to the JSON-encoded reply.
    pub fn script(&self) -> String {
        format!(
            "(() => {{ {bootstrap}; return JSON.stringify(window.__pilot.call({name}, {args})); }})()",
            bootstrap = BOOTSTRAP.as_str(),
            name = Value::from(self.name()),
            args = self.args(),
        )
    }
}

/// Reply envelope produced by the page helper.
#[derive(Debug, Clone, Deserialize)]
pub struct PageReply {
    pub ok: bool,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PageReply {
    pub fn parse(raw: Value) -> Result<Self, DriverError> {
        serde_json::from_value(raw)
            .map_err(|e| DriverError::Script(format!("malformed page reply: {e}")))
    }

    pub fn into_result(self, call: &PageCall) -> Result<Value, DriverError> {
        if self.ok {
            return Ok(self.value);
        }
        let message = self.message.unwrap_or_else(|| "page helper failed".to_string());
        let index = call.index().unwrap_or_default();
        Err(match self.code.as_deref() {
            Some("stale") | Some("not_found") => DriverError::stale(index, message),
            Some("text_not_found") => match call {
                PageCall::ScrollText { text, occurrence } => DriverError::TextNotFound {
                    text: text.clone(),
                    occurrence: *occurrence,
                },
                _ => DriverError::Script(message),
            },
            Some("option_not_found") => DriverError::OptionNotFound(message),
            Some("invalid") => DriverError::InvalidParams(message),
            _ => DriverError::Script(message),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub page_height: f64,
}

/// One indexed element. Its index means nothing outside the snapshot that
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub index: usize,
    pub tag: String,
    pub path: String,
    pub rect: Rect,
    pub visible: bool,
    pub interactive: bool,
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ElementRecord {
    fn describe(&self) -> String {
        let mut line = format!("[{}] {}", self.index, self.tag);
        if !self.text.is_empty() {
            line.push_str(&format!(" \"{}\"", self.text));
        }
        for key in ["type", "name", "placeholder", "aria-label", "href", "role"] {
            if let Some(value) = self.attributes.get(key) {
                line.push_str(&format!(" {key}={value}"));
            }
        }
        line
    }
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    pass: u64,
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    viewport: Viewport,
    #[serde(default)]
    elements: Vec<ElementRecord>,
}

/// Result of one indexing pass. Replaced wholesale, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub pass: u64,
    pub url: String,
    pub title: String,
    pub viewport: Viewport,
    pub elements: Vec<ElementRecord>,
    /// index -> resolvable path
    pub selector_map: BTreeMap<usize, String>,
    pub captured_at: DateTime<Utc>,
    /// Set when the page could not be indexed (browser-internal pages).
    pub restricted: bool,
}

impl PageSnapshot {
    pub fn from_reply(value: Value, expected_pass: u64) -> Result<Self, DriverError> {
        let raw: RawSnapshot = serde_json::from_value(value)
            .map_err(|e| DriverError::Script(format!("malformed snapshot: {e}")))?;
        if raw.pass != expected_pass {
            return Err(DriverError::Script(format!(
                "snapshot pass mismatch: expected {expected_pass}, page returned {}",
                raw.pass
            )));
        }
        for (position, element) in raw.elements.iter().enumerate() {
            if element.index != position {
                return Err(DriverError::Script(format!(
                    "snapshot indices are not sequential at position {position}"
                )));
            }
        }
        let selector_map = raw
            .elements
            .iter()
            .map(|e| (e.index, e.path.clone()))
            .collect();
        Ok(Self {
            pass: raw.pass,
            url: raw.url,
            title: raw.title,
            viewport: raw.viewport,
            elements: raw.elements,
            selector_map,
            captured_at: Utc::now(),
            restricted: false,
        })
    }

    pub fn unindexable(pass: u64, url: impl Into<String>) -> Self {
        Self {
            pass,
            url: url.into(),
            title: String::new(),
            viewport: Viewport::default(),
            elements: Vec::new(),
            selector_map: BTreeMap::new(),
            captured_at: Utc::now(),
            restricted: true,
        }
    }

    pub fn element(&self, index: usize) -> Option<&ElementRecord> {
        self.elements.get(index).filter(|e| e.index == index)
    }

    pub fn find_by_path(&self, path: &str) -> Option<&ElementRecord> {
        self.elements.iter().find(|e| e.path == path)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Compact listing for planning prompts, cut at `max_chars`.
    pub fn render_for_prompt(&self, max_chars: usize) -> String {
        if self.restricted {
            return format!(
                "Page URL: {}\nThis page cannot be indexed (browser-internal). Navigate to a web page first.",
                self.url
            );
        }
        let mut out = format!(
            "Page URL: {}\nTitle: {}\nInteractive elements ({}):\n",
            self.url,
            self.title,
            self.elements.len()
        );
        for element in &self.elements {
            out.push_str(&element.describe());
            out.push('\n');
        }
        truncate_chars(&out, max_chars)
    }
}

pub(crate) fn truncate_chars(raw: &str, max_chars: usize) -> String {
    let total = raw.chars().count();
    if total <= max_chars {
        return raw.to_string();
    }
    let cut: String = raw.chars().take(max_chars).collect();
    format!("{cut}\n... [truncated, {total} total chars]")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_json(pass: u64) -> Value {
        json!({
            "pass": pass,
            "url": "https://example.com/",
            "title": "Example Domain",
            "viewport": {"width": 1280.0, "height": 720.0, "scrollX": 0.0, "scrollY": 0.0, "pageHeight": 900.0},
            "elements": [
                {"index": 0, "tag": "h1", "path": "html > body:nth-child(2) > div:nth-child(1) > h1:nth-child(1)",
                 "rect": {"x": 0.0, "y": 0.0, "width": 100.0, "height": 20.0},
                 "visible": true, "interactive": true, "text": "Example Domain", "attributes": {}},
                {"index": 1, "tag": "a", "path": "#more",
                 "rect": {"x": 0.0, "y": 40.0, "width": 100.0, "height": 20.0},
                 "visible": true, "interactive": true, "text": "More information...",
                 "attributes": {"href": "https://www.iana.org/domains/example"}}
            ]
        })
    }

    #[test]
    fn resolving_same_index_twice_yields_same_record() {
        let snapshot = PageSnapshot::from_reply(snapshot_json(4), 4).unwrap();
        let first = snapshot.element(1).cloned();
        let second = snapshot.element(1).cloned();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().path, "#more");
        assert_eq!(snapshot.selector_map.get(&1).map(String::as_str), Some("#more"));
        assert!(snapshot.element(9).is_none());
    }

    #[test]
    fn snapshot_from_another_pass_is_rejected() {
        let err = PageSnapshot::from_reply(snapshot_json(3), 4).unwrap_err();
        assert!(matches!(err, DriverError::Script(msg) if msg.contains("pass mismatch")));
    }

    #[test]
    fn non_sequential_indices_are_rejected() {
        let mut raw = snapshot_json(1);
        raw["elements"][1]["index"] = json!(5);
        assert!(PageSnapshot::from_reply(raw, 1).is_err());
    }

    #[test]
    fn prompt_rendering_lists_elements_and_truncates() {
        let snapshot = PageSnapshot::from_reply(snapshot_json(1), 1).unwrap();
        let full = snapshot.render_for_prompt(10_000);
        assert!(full.contains("[0] h1 \"Example Domain\""));
        assert!(full.contains("[1] a \"More information...\" href=https://www.iana.org"));

        let cut = snapshot.render_for_prompt(20);
        assert!(cut.contains("[truncated"));
    }

    #[test]
    fn restricted_snapshot_asks_for_navigation() {
        let snapshot = PageSnapshot::unindexable(0, "chrome://newtab/");
        assert!(snapshot.is_empty());
        assert!(snapshot.render_for_prompt(500).contains("Navigate"));
    }

    #[test]
    fn reply_codes_map_to_driver_errors() {
        let call = PageCall::Click { pass: 2, index: 7 };
        let reply = PageReply::parse(json!({"ok": false, "code": "not_found", "message": "gone"})).unwrap();
        assert_eq!(reply.into_result(&call), Err(DriverError::stale(7, "gone")));

        let scroll = PageCall::ScrollText {
            text: "Pricing".into(),
            occurrence: 2,
        };
        let reply = PageReply::parse(json!({"ok": false, "code": "text_not_found", "message": "Pricing"})).unwrap();
        assert!(matches!(
            reply.into_result(&scroll),
            Err(DriverError::TextNotFound { occurrence: 2, .. })
        ));

        let ok = PageReply::parse(json!({"ok": true, "value": "hi"})).unwrap();
        assert_eq!(ok.into_result(&call).unwrap(), json!("hi"));
    }

    #[test]
    fn script_embeds_bootstrap_and_call() {
        let script = PageCall::Fill {
            pass: 3,
            index: 1,
            value: "it's \"quoted\"".into(),
        }
        .script();
        assert!(script.contains("window.__pilot.call(\"fill\", [3,1,\"it's \\\"quoted\\\"\"])"));
        assert!(script.contains("\"interactiveTags\":[\"a\",\"button\""));
        assert!(!script.contains("__PILOT_CONFIG__"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ééééé";
        assert!(truncate_chars(text, 2).starts_with("éé\n"));
    }
}
