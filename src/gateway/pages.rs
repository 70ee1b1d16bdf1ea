//! Server-rendered HTML for the directory UI.
//!
//! Every value that reaches the markup goes through [`esc`].

use crate::records::Connection;
use quick_xml::escape::escape;
use std::borrow::Cow;

const APP_NAME: &str = "ConnectionDB";

fn esc(value: &str) -> Cow<'_, str> {
    escape(value)
}

fn base_style() -> &'static str {
    r#"
    * { margin: 0; padding: 0; box-sizing: border-box; }
    body {
        font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
        background: #f5f5f5; color: #333; padding: 24px;
    }
    .wrap { max-width: 1100px; margin: 0 auto; }
    .card {
        background: #fff; border-radius: 16px; padding: 32px;
        max-width: 440px; margin: 40px auto; box-shadow: 0 4px 24px rgba(0,0,0,0.08);
    }
    header { display: flex; justify-content: space-between; align-items: center; margin-bottom: 20px; }
    header h1 { font-size: 24px; color: #1a1a2e; }
    header h1 a { color: inherit; text-decoration: none; }
    nav a { color: #4a6cf7; text-decoration: none; margin-left: 14px; font-size: 14px; }
    nav a:hover { text-decoration: underline; }
    nav .who { font-size: 14px; color: #666; }
    .search { display: flex; gap: 8px; margin-bottom: 16px; }
    .search input { flex: 1; padding: 10px 12px; border: 1.5px solid #ddd; border-radius: 10px; font-size: 15px; }
    table { width: 100%; border-collapse: collapse; background: #fff; border-radius: 12px; overflow: hidden; }
    th, td { text-align: left; padding: 10px 12px; font-size: 14px; border-bottom: 1px solid #eee; }
    th { background: #f0f4ff; color: #1a1a2e; font-weight: 600; }
    td a { color: #4a6cf7; text-decoration: none; }
    .empty { text-align: center; color: #999; padding: 24px; }
    .form-group { margin-bottom: 16px; }
    .form-group label { display: block; font-size: 14px; font-weight: 500; margin-bottom: 6px; color: #444; }
    .form-group input {
        width: 100%; padding: 12px 14px; border: 1.5px solid #ddd;
        border-radius: 10px; font-size: 16px; outline: none; transition: border-color 0.2s;
    }
    .form-group input:focus { border-color: #4a6cf7; }
    .btn {
        padding: 12px 18px; border: none; border-radius: 10px;
        font-size: 15px; font-weight: 600; cursor: pointer;
    }
    .card .btn { width: 100%; }
    .btn-primary { background: #4a6cf7; color: #fff; }
    .btn-primary:hover { background: #3b5de7; }
    .error { background: #fff0f0; color: #d32f2f; padding: 10px 14px; border-radius: 8px; font-size: 13px; margin-bottom: 16px; }
    .success { background: #effaf1; color: #2e7d32; padding: 10px 14px; border-radius: 8px; font-size: 13px; margin-bottom: 16px; }
    .link { text-align: center; margin-top: 16px; font-size: 14px; color: #666; }
    .link a { color: #4a6cf7; text-decoration: none; }
    "#
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en"><head>
<meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1">
<title>{APP_NAME} - {title}</title>
<style>{style}</style>
</head><body>
{body}
</body></html>"#,
        title = esc(title),
        style = base_style(),
    )
}

fn message_html(class: &str, message: Option<&str>) -> String {
    message
        .map(|m| format!(r#"<div class="{class}">{}</div>"#, esc(m)))
        .unwrap_or_default()
}

/// Directory listing. Edit links and the add/download actions only appear
/// for a logged-in user.
pub fn render_index(records: &[(usize, Connection)], query: &str, user: Option<&str>) -> String {
    let nav = match user {
        Some(user) => format!(
            r#"<span class="who">Signed in as {}</span>
      <a href="/add">Add</a><a href="/download">Download</a>
      <a href="/change-password">Change password</a><a href="/logout">Log out</a>"#,
            esc(user)
        ),
        None => r#"<a href="/login">Log in</a>"#.to_string(),
    };

    let mut header_cells: String = crate::records::COLUMNS
        .iter()
        .map(|c| format!("<th>{}</th>", esc(c)))
        .collect();
    if user.is_some() {
        header_cells.push_str("<th></th>");
    }

    let rows = if records.is_empty() {
        let span = crate::records::COLUMNS.len() + usize::from(user.is_some());
        format!(r#"<tr><td class="empty" colspan="{span}">No connections found.</td></tr>"#)
    } else {
        records
            .iter()
            .map(|(idx, record)| render_row(*idx, record, user.is_some()))
            .collect()
    };

    let body = format!(
        r#"<div class="wrap">
  <header><h1><a href="/">{APP_NAME}</a></h1><nav>{nav}</nav></header>
  <form class="search" method="GET" action="/">
    <input type="text" name="q" value="{query}" placeholder="Search name, company, email, role...">
    <button type="submit" class="btn btn-primary">Search</button>
  </form>
  <table>
    <thead><tr>{header_cells}</tr></thead>
    <tbody>{rows}</tbody>
  </table>
</div>"#,
        query = esc(query),
    );
    layout("Connections", &body)
}

/// Only `http` and `https` links become anchors; anything else is shown as
/// text.
fn is_web_link(link: &str) -> bool {
    let link = link.trim_start();
    ["http://", "https://"].iter().any(|scheme| {
        link.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

fn render_row(idx: usize, record: &Connection, editable: bool) -> String {
    let link = if is_web_link(&record.connection_link) {
        let href = esc(&record.connection_link);
        format!(r#"<a href="{href}" rel="noopener noreferrer" target="_blank">{href}</a>"#)
    } else {
        esc(&record.connection_link).into_owned()
    };
    let edit = if editable {
        format!(r#"<td><a href="/update/{idx}">Edit</a></td>"#)
    } else {
        String::new()
    };
    format!(
        "<tr><td>{}</td><td>{}</td><td>{link}</td><td>{}</td><td>{}</td><td>{}</td>{edit}</tr>",
        esc(&record.name),
        esc(&record.company),
        esc(&record.email),
        esc(record.phone.as_deref().unwrap_or("")),
        esc(&record.role),
    )
}

pub fn render_login(next: &str, error: Option<&str>) -> String {
    let body = format!(
        r#"<div class="card">
  <header><h1>{APP_NAME}</h1></header>
  {error_html}
  <form method="POST" action="/login">
    <input type="hidden" name="next" value="{next}">
    <div class="form-group">
      <label>Username</label>
      <input type="text" name="username" required autocomplete="username">
    </div>
    <div class="form-group">
      <label>Password</label>
      <input type="password" name="password" required autocomplete="current-password">
    </div>
    <button type="submit" class="btn btn-primary">Log in</button>
  </form>
  <div class="link"><a href="/">Back to directory</a></div>
</div>"#,
        error_html = message_html("error", error),
        next = esc(next),
    );
    layout("Log in", &body)
}

/// Which record form to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Add,
    Update(usize),
}

pub fn render_connection_form(mode: FormMode, record: &Connection, error: Option<&str>) -> String {
    let (title, action) = match mode {
        FormMode::Add => ("Add connection".to_string(), "/add".to_string()),
        FormMode::Update(idx) => (format!("Edit connection #{idx}"), format!("/update/{idx}")),
    };
    let field = |label: &str, name: &str, kind: &str, value: &str, required: bool| {
        format!(
            r#"<div class="form-group">
      <label>{label}</label>
      <input type="{kind}" name="{name}" value="{value}"{required}>
    </div>"#,
            value = esc(value),
            required = if required { " required" } else { "" },
        )
    };
    let fields = [
        field("Name", "name", "text", &record.name, true),
        field("Company", "company", "text", &record.company, true),
        field(
            "Connection Link",
            "connection_link",
            "text",
            &record.connection_link,
            true,
        ),
        field("Email", "email", "text", &record.email, true),
        field(
            "Phone No.",
            "phone",
            "text",
            record.phone.as_deref().unwrap_or(""),
            false,
        ),
        field("Role", "role", "text", &record.role, true),
    ]
    .join("\n    ");

    let body = format!(
        r#"<div class="card">
  <header><h1>{title}</h1></header>
  {error_html}
  <form method="POST" action="{action}">
    {fields}
    <button type="submit" class="btn btn-primary">Save</button>
  </form>
  <div class="link"><a href="/">Cancel</a></div>
</div>"#,
        error_html = message_html("error", error),
    );
    layout(&title, &body)
}

pub fn render_change_password(user: &str, error: Option<&str>, success: Option<&str>) -> String {
    let body = format!(
        r#"<div class="card">
  <header><h1>Change password</h1></header>
  <p class="link">Signed in as {user}</p>
  {error_html}{success_html}
  <form method="POST" action="/change-password">
    <div class="form-group">
      <label>Current password</label>
      <input type="password" name="current" required autocomplete="current-password">
    </div>
    <div class="form-group">
      <label>New password</label>
      <input type="password" name="new_password" required autocomplete="new-password">
    </div>
    <div class="form-group">
      <label>Confirm new password</label>
      <input type="password" name="confirm" required autocomplete="new-password">
    </div>
    <button type="submit" class="btn btn-primary">Update password</button>
  </form>
  <div class="link"><a href="/">Back to directory</a></div>
</div>"#,
        user = esc(user),
        error_html = message_html("error", error),
        success_html = message_html("success", success),
    );
    layout("Change password", &body)
}

pub fn render_error(title: &str, message: &str) -> String {
    let body = format!(
        r#"<div class="card">
  <header><h1>{title}</h1></header>
  <div class="error">{message}</div>
  <div class="link"><a href="/">Back to directory</a></div>
</div>"#,
        title = esc(title),
        message = esc(message),
    );
    layout(title, &body)
}
