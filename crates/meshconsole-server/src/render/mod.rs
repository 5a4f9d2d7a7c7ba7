//! Server-side HTML rendering.
//!
//! Pages are assembled from strings: a shared shell with the navigation bar,
//! styles and a small script that calls the `/api/*` endpoints, wrapped around
//! content built in [`cards`]. Every upstream-provided value is escaped.

pub mod cards;
pub mod format;

use crate::auth::AuthContext;
use crate::config::ServerConfig;
use crate::diagnostics::InitCheck;
use format::{MessageKind, escape, message_box};

/// Context every page is rendered with.
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    pub config: &'a ServerConfig,
    pub user: Option<&'a AuthContext>,
}

/// Render a console page with navigation around `content`.
#[must_use]
pub fn shell(page: &Page<'_>, title: &str, active: &str, content: &str) -> String {
    let base = page.config.base_path.as_str();
    let nav_item = |path: &str, id: &str, label: &str| -> String {
        let class = if active == id { "active" } else { "" };
        let mut s = String::with_capacity(128);
        s.push_str("<li class=\"");
        s.push_str(class);
        s.push_str("\"><a href=\"");
        s.push_str(base);
        s.push_str(path);
        s.push_str("\">");
        s.push_str(label);
        s.push_str("</a></li>");
        s
    };

    let mut html = head(page.config, title);
    html.push_str("<nav class=\"");
    html.push_str(&escape(&page.config.color));
    html.push_str(" darken-1\"><div class=\"nav-wrapper\"><a href=\"");
    html.push_str(base);
    html.push_str("/overview\" class=\"brand-logo\">MeshConsole</a><ul class=\"right\">");
    html.push_str(&nav_item("/overview", "overview", "Overview"));
    html.push_str(&nav_item("/machines", "machines", "Machines"));
    html.push_str(&nav_item("/users", "users", "Users"));
    html.push_str(&nav_item("/routes", "routes", "Routes"));
    html.push_str(&nav_item("/settings", "settings", "Settings"));

    // OIDC operators get an account menu with a logout link.
    if let Some(user) = page.user.filter(|u| u.session_id.is_some()) {
        html.push_str("<li class=\"account\"><details><summary>");
        html.push_str(&escape(user.name.as_deref().unwrap_or(&user.username)));
        html.push_str("</summary><ul class=\"dropdown\">");
        if let Some(email) = &user.email {
            html.push_str("<li>");
            html.push_str(&escape(email));
            html.push_str("</li>");
        }
        html.push_str("<li>");
        html.push_str(&escape(&user.username));
        html.push_str("</li>");
        html.push_str(&nav_item("/logout", "logout", "Logout"));
        html.push_str("</ul></details></li>");
    }
    html.push_str("</ul></div></nav>\n");

    html.push_str("<main class=\"container\">\n<h4>");
    html.push_str(&escape(title));
    html.push_str("</h4>\n");
    html.push_str(content);
    html.push_str("\n</main>\n<div id=\"toast\" hidden></div>\n");
    html.push_str(SCRIPT);
    html.push_str("</body></html>\n");
    html
}

/// Render the diagnostics page listing every failed startup check.
#[must_use]
pub fn error_page(config: &ServerConfig, checks: &[InitCheck]) -> String {
    let mut html = head(config, "Error");
    html.push_str("<nav class=\"");
    html.push_str(&escape(&config.color));
    html.push_str(" darken-1\"><div class=\"nav-wrapper\"><span class=\"brand-logo\">MeshConsole</span></div></nav>\n");
    html.push_str("<main class=\"container\">\n<h4>Initialization failed</h4>\n");
    html.push_str(
        "<p>Correct the errors below and restart the server. Until then only this page is available.</p>\n",
    );
    for check in checks {
        let details = format!("<p>{}</p>", escape(&check.details));
        html.push_str(&message_box(MessageKind::Error, &check.title, &details));
    }
    html.push_str("\n</main>\n</body></html>\n");
    html
}

fn head(config: &ServerConfig, title: &str) -> String {
    let mut html = String::with_capacity(16384);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">");
    html.push_str("<title>");
    html.push_str(&escape(title));
    html.push_str(" - MeshConsole</title>");
    html.push_str(CSS);
    html.push_str("</head>\n<body data-base=\"");
    html.push_str(&escape(&config.base_path));
    html.push_str("\">\n");
    html
}

const CSS: &str = r"<style>
body{margin:0;font-family:system-ui,-apple-system,sans-serif;background:#f5f5f5;color:#212121}
nav{display:flex;align-items:center;padding:0 24px;height:56px;color:#fff;background:#e53935}
nav a,nav span{color:#fff;text-decoration:none}
.nav-wrapper{display:flex;justify-content:space-between;align-items:center;width:100%}
.brand-logo{font-size:1.4rem;font-weight:600}
nav ul{list-style:none;display:flex;gap:16px;margin:0;padding:0}
nav li.active a{text-decoration:underline}
.dropdown{position:absolute;flex-direction:column;background:#fff;color:#212121;padding:8px;border-radius:4px}
.dropdown a{color:#212121}
.container{max-width:1100px;margin:0 auto;padding:16px}
.card{background:#fff;border-radius:6px;box-shadow:0 1px 3px rgba(0,0,0,.15);padding:16px;margin-bottom:16px}
.card-title{font-size:1.25rem;font-weight:600;display:flex;gap:8px;align-items:center}
.collection{list-style:none;padding:0;background:#fff;border-radius:6px;box-shadow:0 1px 3px rgba(0,0,0,.15)}
.collection-item{padding:10px 16px;border-bottom:1px solid #eee}
.secondary-content{float:right;font-weight:600}
.badge{display:inline-block;padding:2px 8px;border-radius:10px;font-size:.8rem;color:#fff;background:#757575;cursor:default}
button,.btn{border:0;border-radius:4px;padding:6px 12px;color:#fff;background:#616161;cursor:pointer;margin:2px}
.green{background:#43a047}.red{background:#e53935}.teal{background:#00897b}.blue{background:#1e88e5}
.blue-grey{background:#546e7a}.indigo{background:#3949ab}.brown{background:#6d4c41}.grey{background:#757575}
.deep-orange{background:#f4511e}.yellow{background:#fdd835;color:#212121}.purple{background:#8e24aa}
.green-text{color:#43a047}.yellow-text{color:#f9a825}.orange-text{color:#fb8c00}
.deep-orange-text{color:#f4511e}.red-text{color:#e53935}.grey-text{color:#9e9e9e}
.teal-text{color:#00897b}.blue-text{color:#1e88e5}.indigo-text{color:#3949ab}.purple-text{color:#8e24aa}
table{width:100%;border-collapse:collapse}th,td{text-align:left;padding:6px;border-bottom:1px solid #eee}
tr.expired-row{color:#9e9e9e}
#toast{position:fixed;bottom:16px;right:16px;background:#323232;color:#fff;padding:12px 16px;border-radius:4px}
input{padding:6px;width:60%}
</style>";

const SCRIPT: &str = r#"<script>
const BASE = document.body.dataset.base;
function toast(msg) {
  const el = document.getElementById('toast');
  el.textContent = msg; el.hidden = false;
  setTimeout(() => { el.hidden = true; }, 5000);
}
async function api(path, body) {
  const resp = await fetch(BASE + '/api/' + path, {
    method: 'POST', headers: {'Content-Type': 'application/json'},
    body: JSON.stringify(body || {})
  });
  if (resp.redirected) { window.location = resp.url; return null; }
  const text = await resp.text();
  if (!resp.ok) {
    let msg = text;
    try { msg = JSON.parse(text).message; } catch (e) {}
    toast(msg); return null;
  }
  try { return JSON.parse(text); } catch (e) { return text; }
}
async function act(path, body) {
  if (await api(path, body) !== null) { location.reload(); }
}
function ask(path, label, field, body) {
  const value = prompt(label);
  if (value) { act(path, Object.assign({[field]: value}, body)); }
}
function askTags(machineId) {
  const value = prompt('Tags (comma separated, e.g. tag:server)');
  if (value === null) { return; }
  const tags = value.split(',').map(t => t.trim()).filter(t => t.length > 0);
  act('set_machine_tags', {machine_id: machineId, tags: tags});
}
function registerMachine() {
  const user = prompt('Register under user');
  if (!user) { return; }
  const key = prompt('Machine key');
  if (key) { act('register_machine', {user: user, key: key}); }
}
function confirmAct(path, label, body) {
  if (confirm(label)) { act(path, body); }
}
function addKey(user) {
  const hours = prompt('Key lifetime in hours', '24');
  if (!hours) { return; }
  const expiration = new Date(Date.now() + Number(hours) * 3600000).toISOString();
  act('add_preauth_key', {user: user, reusable: confirm('Reusable?'),
    ephemeral: confirm('Ephemeral?'), expiration: expiration, acl_tags: []});
}
function toggleExpired(id) {
  document.querySelectorAll('#keys-' + id + ' .expired-row')
    .forEach(r => { r.hidden = !r.hidden; });
}
async function saveKey() {
  const r = await api('save_key', {api_key: document.getElementById('api-key').value});
  if (r !== null) { toast(r); setTimeout(() => location.reload(), 1500); }
}
async function testKey() {
  const r = await api('test_key', {});
  if (r !== null) { toast('Key ' + r.prefix + ' is valid, expires ' + r.expiration); }
}
</script>
"#;
