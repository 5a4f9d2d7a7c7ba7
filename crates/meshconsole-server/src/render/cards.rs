//! Page content: overview statistics, machine and user cards, route tables,
//! pre-auth key tables and the settings form.
//!
//! Buttons call the JSON API through the shell's script; their arguments are
//! serialized with `serde_json` and then escaped for the attribute.

use chrono::{DateTime, Duration, Utc};
use meshconsole_client::{ApiKey, Node, PreAuthKey, Route, User};
use meshconsole_core::classify::{Classification, MachineRoutes, RouteCounts};
use meshconsole_core::lifecycle::KeyState;
use serde_json::{Value, json};

use super::format::{
    DurationKind, MessageKind, Palette, duration_color, escape, message_box, palette_color,
    pretty_duration,
};
use crate::config::{DisplayZone, ServerConfig};

/// Machines expiring within this many days get an "Expiring!" badge.
const EXPIRY_WARNING_DAYS: i64 = 14;

/// Shown on the routes page when upstream has nothing to list.
pub const NO_ROUTES: &str = "There are no routes to display!";

fn on_click(function: &str, path: &str, args: &Value) -> String {
    format!(
        " onclick=\"{function}('{path}', {})\"",
        escape(&args.to_string())
    )
}

fn badge(class: &str, label: &str) -> String {
    format!("<span class=\"badge {class}\">{}</span>", escape(label))
}

fn timestamp(zone: &DisplayZone, at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) => format!(
            "<span title=\"{}\">{}</span>",
            escape(&zone.format(at)),
            pretty_duration(now - at, DurationKind::Past)
        ),
        None => "Never".to_owned(),
    }
}

fn row(label: &str, value: &str) -> String {
    format!("<tr><th>{label}</th><td>{value}</td></tr>")
}

fn enabled_button(enabled: bool, label: &str, onclick: &str) -> String {
    let color = if enabled { "green" } else { "red" };
    format!("<button class=\"{color}\"{onclick}>{}</button>", escape(label))
}

// ── Overview ─────────────────────────────────────────────────────────

/// Numbers shown on the overview page.
#[derive(Debug, Clone, Default)]
pub struct OverviewStats {
    pub machines: usize,
    pub users: usize,
    pub usable_preauth_keys: usize,
    pub routes: RouteCounts,
}

#[must_use]
pub fn overview_content(
    config: &ServerConfig,
    stats: &OverviewStats,
    key: Option<&ApiKey>,
    now: DateTime<Utc>,
) -> String {
    let item = |label: &str, value: &str| {
        format!(
            "<li class=\"collection-item\">{label}<span class=\"secondary-content\">{value}</span></li>"
        )
    };

    let mut html = String::with_capacity(2048);
    html.push_str("<div class=\"card\"><div class=\"card-title\">Server Statistics</div><ul class=\"collection\">");
    html.push_str(&item("Machines Added", &stats.machines.to_string()));
    html.push_str(&item("Users Added", &stats.users.to_string()));
    html.push_str(&item(
        "Usable Preauth Keys",
        &stats.usable_preauth_keys.to_string(),
    ));
    html.push_str(&item(
        "Enabled/Total Routes",
        &format!("{}/{}", stats.routes.enabled, stats.routes.total),
    ));
    html.push_str(&item(
        "Enabled/Total Exits",
        &format!("{}/{}", stats.routes.exits_enabled, stats.routes.exits_total),
    ));
    html.push_str("</ul></div>");

    html.push_str("<div class=\"card\"><div class=\"card-title\">Headscale</div><ul class=\"collection\">");
    html.push_str(&item("Server", &escape(&config.hs_server)));
    let expiry = key
        .and_then(|k| k.expiration)
        .map_or_else(
            || "Unknown".to_owned(),
            |exp| {
                format!(
                    "<span title=\"{}\">{}</span>",
                    escape(&config.timezone.format(exp)),
                    pretty_duration(exp - now, DurationKind::Expiry)
                )
            },
        );
    html.push_str(&item("API Key Expiration", &expiry));
    html.push_str("</ul></div>");
    html
}

// ── Machines ─────────────────────────────────────────────────────────

/// A machine card with details, route buttons and actions.
#[must_use]
pub fn machine_card(
    node: &Node,
    routes: &MachineRoutes,
    zone: &DisplayZone,
    now: DateTime<Utc>,
) -> String {
    let id = json!({ "machine_id": node.id });
    let mut html = String::with_capacity(4096);

    let status = node
        .last_seen
        .map_or("grey-text", |seen| duration_color(now - seen));
    html.push_str("<div class=\"card\"><div class=\"card-title\">");
    html.push_str(&format!("<span class=\"{status}\">&#9679;</span>"));
    html.push_str(&escape(node.display_name()));
    if routes.exit.as_ref().is_some_and(|e| e.enabled) {
        html.push_str(&badge("green", "Exit"));
    }
    if routes.ha_enabled {
        html.push_str(&badge("blue", "HA"));
    }
    let expiry = node.effective_expiry();
    if let Some(exp) = expiry {
        let left = exp - now;
        if left > Duration::zero() && left < Duration::days(EXPIRY_WARNING_DAYS) {
            html.push_str(&badge("red", "Expiring!"));
        }
    }
    html.push_str("</div><table>");

    html.push_str(&row("ID", &node.id.to_string()));
    html.push_str(&row("Hostname", &escape(&node.name)));
    if let Some(user) = &node.user {
        html.push_str(&row(
            "User",
            &badge(palette_color(user.id, Palette::Default), &user.name),
        ));
    }
    html.push_str(&row(
        "IP Addresses",
        &node
            .ip_addresses
            .iter()
            .map(String::as_str)
            .map(escape)
            .collect::<Vec<_>>()
            .join("<br>"),
    ));
    if !node.forced_tags.is_empty() {
        let tags: String = node
            .forced_tags
            .iter()
            .map(|t| badge("grey", t.strip_prefix("tag:").unwrap_or(t)))
            .collect();
        html.push_str(&row("Tags", &tags));
    }
    html.push_str(&row("Last Seen", &timestamp(zone, node.last_seen, now)));
    html.push_str(&row(
        "Last Update",
        &timestamp(zone, node.last_successful_update, now),
    ));
    html.push_str(&row("Created", &timestamp(zone, node.created_at, now)));
    let expiry = match expiry {
        None => "No expiration date.".to_owned(),
        Some(exp) if exp <= now => format!(
            "<span class=\"red-text\" title=\"{}\">Expired {}</span>",
            escape(&zone.format(exp)),
            pretty_duration(now - exp, DurationKind::Past)
        ),
        Some(exp) => format!(
            "<span title=\"{}\">{}</span>",
            escape(&zone.format(exp)),
            pretty_duration(exp - now, DurationKind::Expiry)
        ),
    };
    html.push_str(&row("Expiry", &expiry));
    let preauth = node
        .pre_auth_key
        .as_ref()
        .map_or_else(|| "None".to_owned(), |k| escape(meshconsole_client::key_prefix(&k.key)));
    html.push_str(&row("PreAuth Key", &preauth));
    if routes.has_advertised {
        html.push_str(&row("Routes", &machine_routes(routes)));
    }
    html.push_str("</table><div class=\"card-action\">");

    html.push_str(&format!(
        "<button onclick=\"ask('rename_machine', 'New machine name', 'new_name', {})\">Rename</button>",
        escape(&id.to_string())
    ));
    html.push_str(&format!(
        "<button onclick=\"ask('move_user', 'Move to user', 'user', {})\">Change User</button>",
        escape(&id.to_string())
    ));
    html.push_str(&format!(
        "<button onclick=\"askTags({})\">Edit Tags</button>",
        node.id
    ));
    html.push_str(&format!(
        "<button class=\"red\" onclick=\"confirmAct('delete_machine', 'Delete {}?', {})\">Delete</button>",
        escape(&node.display_name().replace('\'', "")),
        escape(&id.to_string())
    ));
    html.push_str("</div></div>\n");
    html
}

fn machine_routes(routes: &MachineRoutes) -> String {
    let mut html = String::with_capacity(512);
    if let Some(exit) = &routes.exit {
        let args = json!({ "route_ids": exit.route_ids, "current_state": exit.enabled });
        html.push_str(&enabled_button(
            exit.enabled,
            "Exit Node",
            &on_click("act", "toggle_exit", &args),
        ));
    }
    for member in &routes.failover {
        let state = if member.route.enabled { "enabled" } else { "disabled" };
        let primary = if member.route.is_primary { ", primary" } else { "" };
        let args = json!({ "route_id": member.route.id, "current_state": member.route.enabled });
        html.push_str(&format!(
            "<button class=\"{}\" title=\"Failover route ({state}{primary})\"{}>{}</button>",
            palette_color(member.color_index as u64, Palette::Failover),
            on_click("act", "update_route", &args),
            escape(&member.route.prefix)
        ));
    }
    for route in &routes.plain {
        let args = json!({ "route_id": route.id, "current_state": route.enabled });
        html.push_str(&enabled_button(
            route.enabled,
            &route.prefix,
            &on_click("act", "update_route", &args),
        ));
    }
    html
}

// ── Users ────────────────────────────────────────────────────────────

/// A user card; `preauth` is the already rendered key table or notice.
#[must_use]
pub fn user_card(user: &User, preauth: &str, zone: &DisplayZone, now: DateTime<Utc>) -> String {
    let name = json!({ "old_name": user.name });
    let mut html = String::with_capacity(2048 + preauth.len());
    html.push_str("<div class=\"card\"><div class=\"card-title\">");
    html.push_str(&format!(
        "<span class=\"{}\">&#9679;</span>",
        palette_color(user.id, Palette::Text)
    ));
    html.push_str(&escape(&user.name));
    html.push_str("</div><table>");
    html.push_str(&row("ID", &user.id.to_string()));
    html.push_str(&row("Created", &timestamp(zone, user.created_at, now)));
    html.push_str("</table>");

    html.push_str("<h6>PreAuth Keys ");
    html.push_str(&format!(
        "<button onclick=\"toggleExpired({})\">Toggle Expired</button>",
        user.id
    ));
    html.push_str(&format!(
        "<button class=\"green\" onclick=\"addKey({})\">Add PreAuth Key</button>",
        escape(&Value::String(user.name.clone()).to_string())
    ));
    html.push_str("</h6>");
    html.push_str(&format!("<div id=\"keys-{}\">", user.id));
    html.push_str(preauth);
    html.push_str("</div><div class=\"card-action\">");
    html.push_str(&format!(
        "<button onclick=\"ask('rename_user', 'New user name', 'new_name', {})\">Rename</button>",
        escape(&name.to_string())
    ));
    html.push_str(&format!(
        "<button class=\"red\" onclick=\"confirmAct('delete_user', 'Delete this user?', {})\">Delete</button>",
        escape(&json!({ "name": user.name }).to_string())
    ));
    html.push_str("</div></div>\n");
    html
}

/// Table of a user's pre-auth keys. Expired rows start hidden.
#[must_use]
pub fn preauth_table(user: &str, keys: &[PreAuthKey], zone: &DisplayZone, now: DateTime<Utc>) -> String {
    if keys.is_empty() {
        return "<p>No keys defined for this user</p>".to_owned();
    }

    let yes_no = |b: bool| if b { "Yes" } else { "No" };
    let mut html = String::with_capacity(512 + keys.len() * 256);
    html.push_str(
        "<table><thead><tr><th>ID</th><th>Key Prefix</th><th>Reusable</th><th>Used</th>\
         <th>Ephemeral</th><th>Usable</th><th>Actions</th></tr></thead><tbody>",
    );
    for key in keys {
        let expired = key.is_expired(now);
        let usable = key.is_usable(now);
        let title = key
            .expiration
            .map_or_else(|| "No expiration".to_owned(), |exp| format!("Expiration: {}", zone.format(exp)));
        if expired {
            html.push_str("<tr class=\"expired-row\" hidden");
        } else {
            html.push_str("<tr");
        }
        html.push_str(&format!(" title=\"{}\">", escape(&title)));
        html.push_str(&format!("<td>{}</td>", key.id));
        html.push_str(&format!(
            "<td>{}</td>",
            escape(meshconsole_client::key_prefix(&key.key))
        ));
        html.push_str(&format!("<td>{}</td>", yes_no(key.reusable)));
        html.push_str(&format!("<td>{}</td>", yes_no(key.used)));
        html.push_str(&format!("<td>{}</td>", yes_no(key.ephemeral)));
        html.push_str(&format!("<td>{}</td>", yes_no(usable)));
        if usable {
            let args = json!({ "user": user, "key": key.key });
            html.push_str(&format!(
                "<td><button class=\"red\"{}>Expire</button></td>",
                on_click("act", "expire_preauth_key", &args)
            ));
        } else {
            html.push_str("<td></td>");
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
    html
}

/// Shown in place of a user's key table when listing failed.
#[must_use]
pub fn preauth_unavailable(reason: &str) -> String {
    message_box(
        MessageKind::Warning,
        "Pre-auth keys unavailable",
        &format!("<p>{}</p>", escape(reason)),
    )
}

// ── Routes ───────────────────────────────────────────────────────────

/// The routes page: plain, failover and exit routes.
#[must_use]
pub fn routes_content(routes: &[Route], classification: &Classification) -> String {
    let find = |id: u64| routes.iter().find(|r| r.id == id);
    let attached = |r: &&Route| !r.machine_name.is_empty();

    if !routes.iter().any(|r| !r.machine_name.is_empty()) {
        return format!("<p>{NO_ROUTES}</p>");
    }

    let mut html = String::with_capacity(4096);

    let plain: Vec<&Route> = classification
        .plain
        .iter()
        .filter_map(|id| find(*id))
        .filter(attached)
        .collect();
    if !plain.is_empty() {
        html.push_str("<div class=\"card\"><div class=\"card-title\">Routes</div><table>");
        html.push_str("<thead><tr><th>ID</th><th>Machine</th><th>Route</th><th>Enabled</th></tr></thead><tbody>");
        for route in plain {
            let args = json!({ "route_id": route.id, "current_state": route.enabled });
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                route.id,
                escape(&route.machine_name),
                escape(&route.prefix),
                enabled_button(
                    route.enabled,
                    if route.enabled { "Enabled" } else { "Disabled" },
                    &on_click("act", "update_route", &args),
                )
            ));
        }
        html.push_str("</tbody></table></div>");
    }

    if !classification.failover.is_empty() {
        html.push_str("<div class=\"card\"><div class=\"card-title\">Failover Routes</div>");
        for group in &classification.failover {
            let indicator = if group.any_enabled { "green-text" } else { "red-text" };
            html.push_str(&format!(
                "<h6><span class=\"{indicator}\">&#9679;</span> <span class=\"badge {}\">{}</span></h6>",
                palette_color(group.color_index as u64, Palette::Failover),
                escape(&group.prefix)
            ));
            html.push_str("<table><thead><tr><th>Machine</th><th>Enabled</th><th>Primary</th></tr></thead><tbody>");
            for route in group.route_ids.iter().filter_map(|id| find(*id)) {
                let args = json!({ "route_id": route.id, "current_state": route.enabled });
                html.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                    escape(&route.machine_name),
                    enabled_button(
                        route.enabled,
                        if route.enabled { "Enabled" } else { "Disabled" },
                        &on_click("act", "update_route", &args),
                    ),
                    if route.is_primary { "Yes" } else { "No" }
                ));
            }
            html.push_str("</tbody></table>");
        }
        html.push_str("</div>");
    }

    if !classification.exit_pairs.is_empty() {
        html.push_str("<div class=\"card\"><div class=\"card-title\">Exit Routes</div><table>");
        html.push_str("<thead><tr><th>Machine</th><th>Enabled</th></tr></thead><tbody>");
        for pair in &classification.exit_pairs {
            let args = json!({ "route_ids": pair.route_ids, "current_state": pair.enabled });
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td></tr>",
                escape(&pair.machine_name),
                enabled_button(
                    pair.enabled,
                    if pair.enabled { "Enabled" } else { "Disabled" },
                    &on_click("act", "toggle_exit", &args),
                )
            ));
        }
        html.push_str("</tbody></table></div>");
    }

    html
}

// ── Settings ─────────────────────────────────────────────────────────

/// The settings page: key status, key form and build information.
#[must_use]
pub fn settings_content(
    config: &ServerConfig,
    key_state: Option<&KeyState>,
    now: DateTime<Utc>,
) -> String {
    let zone = &config.timezone;
    let expires = |info: &ApiKey| {
        info.expiration.map_or_else(
            || "never expires".to_owned(),
            |exp| {
                format!(
                    "expires {} ({})",
                    pretty_duration(exp - now, DurationKind::Expiry),
                    escape(&zone.format(exp))
                )
            },
        )
    };

    let status = match key_state {
        Some(KeyState::Unconfigured) => message_box(
            MessageKind::Warning,
            "No API key",
            "<p>Generate a key with <code>headscale apikeys create</code> and save it below.</p>",
        ),
        Some(KeyState::Valid(info)) => message_box(
            MessageKind::Success,
            "API key valid",
            &format!("<p>Key {} {}.</p>", escape(&info.prefix), expires(info)),
        ),
        Some(KeyState::NearExpiry(info)) => message_box(
            MessageKind::Warning,
            "API key expiring",
            &format!(
                "<p>Key {} {}. It will be renewed automatically.</p>",
                escape(&info.prefix),
                expires(info)
            ),
        ),
        Some(KeyState::Renewing) => message_box(
            MessageKind::Information,
            "API key renewing",
            "<p>A replacement key is being minted.</p>",
        ),
        Some(KeyState::Invalid) => message_box(
            MessageKind::Error,
            "API key invalid",
            "<p>The saved key is rejected by the Headscale server. Save a new key below.</p>",
        ),
        None => message_box(
            MessageKind::Error,
            "API key status unknown",
            "<p>The Headscale server could not be asked about the key.</p>",
        ),
    };

    let mut html = String::with_capacity(4096);
    html.push_str(&status);
    html.push_str("<div class=\"card\"><div class=\"card-title\">API Key</div>");
    html.push_str("<input id=\"api-key\" type=\"password\" autocomplete=\"off\" placeholder=\"Headscale API key\">");
    html.push_str("<button class=\"green\" onclick=\"saveKey()\">Save</button>");
    html.push_str("<button onclick=\"testKey()\">Test</button></div>");

    let build = &config.build;
    html.push_str("<div class=\"card\"><div class=\"card-title\">About</div><table>");
    html.push_str(&row("Headscale Server", &escape(&config.hs_server)));
    html.push_str(&row("Headscale Version", &escape(&build.hs_version)));
    html.push_str(&row("App Version", &escape(&build.app_version)));
    html.push_str(&row("Build Date", &escape(&build.build_date)));
    html.push_str(&row("Git Commit", &escape(&build.git_commit)));
    html.push_str(&row("Git Branch", &escape(&build.git_branch)));
    html.push_str(&row("Timezone", &escape(&zone.label())));
    html.push_str("</table></div>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshconsole_core::classify::classify;

    fn route(id: u64, machine_id: u64, machine: &str, prefix: &str, enabled: bool) -> Route {
        Route {
            id,
            prefix: prefix.to_owned(),
            advertised: true,
            enabled,
            is_primary: enabled,
            machine_id,
            machine_name: machine.to_owned(),
        }
    }

    fn node(id: u64, name: &str) -> Node {
        Node {
            id,
            name: name.to_owned(),
            given_name: name.to_owned(),
            user: Some(User {
                id: 3,
                name: "alice".to_owned(),
                created_at: None,
            }),
            ip_addresses: vec!["100.64.0.1".to_owned()],
            last_seen: None,
            last_successful_update: None,
            expiry: None,
            created_at: None,
            pre_auth_key: None,
            forced_tags: vec!["tag:server".to_owned()],
            valid_tags: Vec::new(),
            invalid_tags: Vec::new(),
            online: false,
        }
    }

    fn preauth(id: u64, used: bool, reusable: bool, expiration: DateTime<Utc>) -> PreAuthKey {
        PreAuthKey {
            id,
            user: "alice".to_owned(),
            key: format!("key{id:07}secret"),
            reusable,
            ephemeral: false,
            used,
            expiration: Some(expiration),
            created_at: None,
            acl_tags: Vec::new(),
        }
    }

    #[test]
    fn empty_route_list_shows_notice() {
        let html = routes_content(&[], &classify(&[]));
        assert_eq!(html, "<p>There are no routes to display!</p>");
    }

    #[test]
    fn routes_page_has_three_sections() {
        let routes = vec![
            route(1, 1, "gw", "0.0.0.0/0", true),
            route(2, 1, "gw", "::/0", true),
            route(3, 1, "gw", "10.0.0.0/24", false),
            route(4, 2, "gw2", "10.0.0.0/24", true),
            route(5, 2, "gw2", "192.168.1.0/24", false),
        ];
        let html = routes_content(&routes, &classify(&routes));
        assert!(html.contains("<div class=\"card-title\">Routes</div>"));
        assert!(html.contains("<div class=\"card-title\">Failover Routes</div>"));
        assert!(html.contains("<div class=\"card-title\">Exit Routes</div>"));
        assert!(html.contains("192.168.1.0/24"));
        assert!(html.contains("toggle_exit"));
    }

    #[test]
    fn machine_card_shows_routes_and_badges() {
        let routes = vec![
            route(1, 7, "gw", "0.0.0.0/0", true),
            route(2, 7, "gw", "::/0", true),
            route(3, 7, "gw", "10.1.0.0/16", false),
        ];
        let classification = classify(&routes);
        let machine = MachineRoutes::for_machine(7, &routes, &classification);
        let now = Utc::now();
        let mut n = node(7, "gw");
        n.expiry = Some(now + Duration::days(3));

        let html = machine_card(&n, &machine, &DisplayZone::utc(), now);
        assert!(html.contains(">Exit</span>"));
        assert!(html.contains(">Expiring!</span>"));
        assert!(html.contains("10.1.0.0/16"));
        assert!(html.contains(">server</span>"));
        assert!(html.contains("&quot;route_ids&quot;:[1,2]"));
    }

    #[test]
    fn machine_without_expiry_says_so() {
        let routes: Vec<Route> = Vec::new();
        let classification = classify(&routes);
        let machine = MachineRoutes::for_machine(1, &routes, &classification);
        let html = machine_card(&node(1, "laptop"), &machine, &DisplayZone::utc(), Utc::now());
        assert!(html.contains("No expiration date."));
        assert!(!html.contains("Exit Node"));
    }

    #[test]
    fn preauth_table_hides_expired_rows() {
        let now = Utc::now();
        let keys = vec![
            preauth(1, false, false, now + Duration::days(1)),
            preauth(2, false, false, now - Duration::days(1)),
            preauth(3, true, false, now + Duration::days(1)),
        ];
        let html = preauth_table("alice", &keys, &DisplayZone::utc(), now);
        assert_eq!(html.matches("<tr class=\"expired-row\" hidden").count(), 1);
        assert_eq!(html.matches(">Expire</button>").count(), 1);
        assert!(html.contains("<th>Key Prefix</th>"));
    }

    #[test]
    fn no_preauth_keys_message() {
        let html = preauth_table("alice", &[], &DisplayZone::utc(), Utc::now());
        assert_eq!(html, "<p>No keys defined for this user</p>");
    }

    #[test]
    fn user_names_are_escaped() {
        let user = User {
            id: 1,
            name: "<script>".to_owned(),
            created_at: None,
        };
        let html = user_card(&user, "", &DisplayZone::utc(), Utc::now());
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
