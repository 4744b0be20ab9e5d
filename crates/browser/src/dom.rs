//! In-page JavaScript for element lookup, page sampling and resource fetches.
//!
//! Matched elements are tagged with a `data-mirage-ref` attribute so later
//! clicks and keystrokes can find them again without re-running the selector.
//! Lookups cover the top document and every same-origin iframe.

use {
    chromiumoxide::{Page, cdp::js_protocol::runtime::EvaluateParams},
    serde_json::Value,
    tracing::debug,
};

use crate::{
    error::BrowserError,
    types::{ElementHandle, ElementInfo, FetchedResource, PageState, Selector, SelectorMatch},
};

/// Upper bound on sampled page text, in characters.
const MAX_PAGE_TEXT: usize = 20_000;

/// Shared helpers prepended to every script.
///
/// `docs()` lists the top document plus same-origin frame documents together
/// with the frame's offset in the top viewport. `query()` runs a CSS or
/// XPath selector against one document.
const PRELUDE_JS: &str = r#"
    const docs = () => {
        const out = [{ doc: document, frame: null, dx: 0, dy: 0 }];
        const frames = document.querySelectorAll('iframe, frame');
        frames.forEach((f, i) => {
            try {
                const d = f.contentDocument;
                if (!d) return;
                const r = f.getBoundingClientRect();
                out.push({ doc: d, frame: i, dx: r.left, dy: r.top });
            } catch (_) {}
        });
        return out;
    };
    const query = (doc, sel) => {
        if (sel.kind === 'xpath') {
            const snap = doc.evaluate(sel.expr, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            const nodes = [];
            for (let i = 0; i < snap.snapshotLength; i++) {
                const n = snap.snapshotItem(i);
                if (n && n.nodeType === 1) nodes.push(n);
            }
            return nodes;
        }
        return Array.from(doc.querySelectorAll(sel.expr));
    };
    const byRef = (ref) => {
        for (const d of docs()) {
            const el = d.doc.querySelector(`[data-mirage-ref="${ref}"]`);
            if (el) return { el, d };
        }
        return null;
    };
    const isVisible = (el) => {
        const rect = el.getBoundingClientRect();
        const style = (el.ownerDocument.defaultView || window).getComputedStyle(el);
        return rect.width > 0 && rect.height > 0 &&
            style.visibility !== 'hidden' && style.display !== 'none';
    };
"#;

fn script(body: &str) -> String {
    format!("(() => {{ {PRELUDE_JS} {body} }})()")
}

fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, BrowserError> {
    serde_json::to_string(value).map_err(|e| BrowserError::InvalidAction(e.to_string()))
}

pub(crate) fn find_elements_js(selector: &Selector) -> Result<String, BrowserError> {
    let sel = js_literal(selector)?;
    Ok(script(&format!(
        r#"
        const sel = {sel};
        window.__mirageRefSeq = window.__mirageRefSeq || 0;
        const elements = [];
        try {{
            for (const d of docs()) {{
                for (const el of query(d.doc, sel)) {{
                    let ref = el.getAttribute('data-mirage-ref');
                    if (!ref) {{
                        ref = String(++window.__mirageRefSeq);
                        el.setAttribute('data-mirage-ref', ref);
                    }}
                    elements.push({{ ref_: Number(ref), tag: el.tagName.toLowerCase(), frame: d.frame }});
                }}
            }}
        }} catch (e) {{
            return {{ ok: false, error: String(e && e.message || e) }};
        }}
        return {{ ok: true, elements }};
        "#
    )))
}

pub(crate) fn page_state_js(watched: &[Selector]) -> Result<String, BrowserError> {
    let watched = js_literal(watched)?;
    Ok(script(&format!(
        r#"
        const watched = {watched};
        const all = docs();
        const text = all
            .map(d => (d.doc.body && d.doc.body.innerText) || '')
            .join('\n')
            .slice(0, {MAX_PAGE_TEXT});
        const info = (el) => ({{
            tag: el.tagName.toLowerCase(),
            src: el.currentSrc || el.src || el.getAttribute('src') || null,
            href: el.href || el.getAttribute('href') || null,
            alt: el.getAttribute('alt'),
            text: ((el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ').slice(0, 200)) || null,
            visible: isVisible(el),
        }});
        const results = watched.map(sel => {{
            try {{
                return all.flatMap(d => query(d.doc, sel).map(info));
            }} catch (_) {{
                return [];
            }}
        }});
        return {{ url: location.href, title: document.title, text, watched: results }};
        "#
    )))
}

pub(crate) fn element_center_js(ref_: u32) -> String {
    script(&format!(
        r#"
        const hit = byRef({ref_});
        if (!hit) return null;
        hit.el.scrollIntoView({{ behavior: 'instant', block: 'center' }});
        const r = hit.el.getBoundingClientRect();
        const f = hit.d.frame === null ? {{ left: 0, top: 0 }}
            : document.querySelectorAll('iframe, frame')[hit.d.frame].getBoundingClientRect();
        return {{ x: f.left + r.left + r.width / 2, y: f.top + r.top + r.height / 2 }};
        "#
    ))
}

pub(crate) fn focus_and_clear_js(ref_: u32) -> String {
    script(&format!(
        r#"
        const hit = byRef({ref_});
        if (!hit) return false;
        const el = hit.el;
        el.focus();
        if ('value' in el) {{
            el.value = '';
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
        }} else if (el.isContentEditable) {{
            el.textContent = '';
        }}
        return true;
        "#
    ))
}

pub(crate) fn fetch_js(url: &str) -> Result<String, BrowserError> {
    let url = js_literal(url)?;
    Ok(format!(
        r#"(async () => {{
            try {{
                const resp = await fetch({url}, {{ credentials: 'include' }});
                if (!resp.ok) return {{ ok: false, error: `HTTP ${{resp.status}}` }};
                const blob = await resp.blob();
                const dataUrl = await new Promise((resolve, reject) => {{
                    const reader = new FileReader();
                    reader.onload = () => resolve(reader.result);
                    reader.onerror = () => reject(reader.error);
                    reader.readAsDataURL(blob);
                }});
                return {{ ok: true, dataUrl, contentType: blob.type || null }};
            }} catch (e) {{
                return {{ ok: false, error: String(e && e.message || e) }};
            }}
        }})()"#
    ))
}

async fn eval(page: &Page, js: String) -> Result<Value, BrowserError> {
    let params = EvaluateParams::builder()
        .expression(js)
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(BrowserError::JsEvalFailed)?;
    page.evaluate_expression(params)
        .await
        .map_err(|e| BrowserError::JsEvalFailed(e.to_string()))?
        .into_value()
        .map_err(|e| BrowserError::JsEvalFailed(format!("failed to get result: {e:?}")))
}

/// Find every element matching `selector`, tagging each with a ref.
pub async fn find_elements(
    page: &Page,
    selector: &Selector,
) -> Result<Vec<ElementHandle>, BrowserError> {
    let result = eval(page, find_elements_js(selector)?).await?;
    let handles = parse_handles(&result)?;
    debug!(selector = %selector, count = handles.len(), "found elements");
    Ok(handles)
}

/// Sample url, title, text and the watched elements.
pub async fn page_state(page: &Page, watched: &[Selector]) -> Result<PageState, BrowserError> {
    let result = eval(page, page_state_js(watched)?).await?;
    parse_page_state(&result, watched)
}

/// Scroll the element into view and return its centre in top-level viewport
/// coordinates.
pub async fn element_center(page: &Page, ref_: u32) -> Result<(f64, f64), BrowserError> {
    let result = eval(page, element_center_js(ref_)).await?;
    match (result["x"].as_f64(), result["y"].as_f64()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(BrowserError::ElementNotFound(ref_)),
    }
}

/// Focus the element and clear any existing value.
pub async fn focus_and_clear(page: &Page, ref_: u32) -> Result<(), BrowserError> {
    let result = eval(page, focus_and_clear_js(ref_)).await?;
    if result.as_bool() != Some(true) {
        return Err(BrowserError::ElementNotFound(ref_));
    }
    Ok(())
}

/// Fetch `url` from inside the page, with the page's cookies and origin.
///
/// Works for `blob:` URLs, which only exist inside the page that created them.
pub async fn fetch_in_page(page: &Page, url: &str) -> Result<FetchedResource, BrowserError> {
    let result = eval(page, fetch_js(url)?).await?;
    parse_fetch(&result)
}

fn parse_handles(result: &Value) -> Result<Vec<ElementHandle>, BrowserError> {
    if result["ok"].as_bool() != Some(true) {
        let msg = result["error"].as_str().unwrap_or("selector evaluation failed");
        return Err(BrowserError::InvalidSelector(msg.to_string()));
    }
    let elements = result["elements"].clone();
    serde_json::from_value(elements)
        .map_err(|e| BrowserError::JsEvalFailed(format!("malformed element list: {e}")))
}

fn parse_page_state(result: &Value, watched: &[Selector]) -> Result<PageState, BrowserError> {
    let matched = result["watched"]
        .as_array()
        .ok_or_else(|| BrowserError::JsEvalFailed("watched not an array".into()))?;

    let watched = watched
        .iter()
        .zip(matched.iter().map(Some).chain(std::iter::repeat(None)))
        .map(|(selector, found)| SelectorMatch {
            selector: selector.clone(),
            elements: found
                .and_then(|v| serde_json::from_value::<Vec<ElementInfo>>(v.clone()).ok())
                .unwrap_or_default(),
        })
        .collect();

    Ok(PageState {
        url: result["url"].as_str().unwrap_or_default().to_string(),
        title: result["title"].as_str().unwrap_or_default().to_string(),
        text: result["text"].as_str().unwrap_or_default().to_string(),
        watched,
    })
}

fn parse_fetch(result: &Value) -> Result<FetchedResource, BrowserError> {
    if result["ok"].as_bool() != Some(true) {
        let msg = result["error"].as_str().unwrap_or("unknown error");
        return Err(BrowserError::FetchFailed(msg.to_string()));
    }
    let data_url = result["dataUrl"]
        .as_str()
        .ok_or_else(|| BrowserError::FetchFailed("missing data URL".into()))?;
    let mut resource = FetchedResource::from_data_url(data_url)?;
    if let Some(ct) = result["contentType"].as_str().filter(|c| !c.is_empty()) {
        resource.content_type = Some(ct.to_string());
    }
    Ok(resource)
}
