// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Upload page template

use minijinja::{context, Environment};

use crate::config::AppConfig;
use crate::Result;

const INDEX_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Image Classifier and Renamer</title>
    <style>
        :root {
            --bg-primary: #1a1a2e;
            --bg-secondary: #16213e;
            --bg-card: #0f3460;
            --text-primary: #e8e8e8;
            --text-secondary: #a0a0a0;
            --accent: #4caf50;
            --danger: #e94560;
            --border: #2a2a4a;
        }
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }
        .container { max-width: 900px; margin: 0 auto; padding: 20px; }
        h1, h3 { text-align: center; color: var(--accent); margin: 20px 0; }
        .card {
            background: var(--bg-card);
            border-radius: 12px;
            padding: 20px;
            margin-bottom: 20px;
        }
        button, .button {
            background: var(--accent);
            color: white;
            border: none;
            border-radius: 6px;
            padding: 8px 18px;
            cursor: pointer;
            text-decoration: none;
            display: inline-block;
        }
        button.secondary { background: var(--bg-secondary); border: 1px solid var(--border); }
        button:disabled { opacity: 0.5; cursor: default; }
        .progress {
            width: 100%;
            height: 12px;
            background: var(--bg-secondary);
            border-radius: 6px;
            overflow: hidden;
            margin: 10px 0;
        }
        .progress-fill { height: 100%; width: 0; background: var(--accent); transition: width 0.2s; }
        .muted { color: var(--text-secondary); font-size: 0.9em; }
        .error { color: var(--danger); }
        .hidden { display: none; }
        ul { margin-left: 20px; }
    </style>
</head>
<body>
<main class="container">
    <h1>Image Classifier and Renamer</h1>

    <div class="card">
        <form id="upload-form">
            <input id="files" type="file" name="files" multiple accept="{{ accept }}">
            <button type="submit" id="process">Process</button>
        </form>
        <p class="muted">
            Accepted types: {{ extensions }}. Max upload: {{ max_upload_mb }} MB.
            {% if labels %}Classes: {{ labels | join(", ") }}.{% endif %}
        </p>
        <ul id="rejected" class="error"></ul>
    </div>

    <div class="card hidden" id="progress-card">
        <h3>Processing Images...</h3>
        <div class="progress"><div class="progress-fill" id="bar"></div></div>
        <p id="progress-text">Processed 0/0</p>
        <button class="secondary" id="cancel">Cancel</button>
    </div>

    <div class="card hidden" id="result-card">
        <h3>Download Processed Images</h3>
        <p id="summary"></p>
        <ul id="failed" class="error"></ul>
        <p style="text-align: center; margin-top: 15px;">
            <a class="button" id="download" href="#">Download ZIP</a>
        </p>
    </div>

    <p id="message" class="error"></p>
</main>
<script>
const archiveName = "{{ archive_name }}";
let sessionId = null;

const $ = (id) => document.getElementById(id);
const show = (id, visible) => $(id).classList.toggle("hidden", !visible);

async function api(method, path, body) {
    const response = await fetch(path, { method: method, body: body });
    const data = await response.json().catch(() => ({}));
    if (!response.ok && !(data && data.accepted)) {
        throw new Error((data.error && data.error.message) || response.statusText);
    }
    return data;
}

async function newSession() {
    const data = await api("POST", "/api/sessions");
    sessionId = data.id;
}

function listItems(id, items) {
    $(id).innerHTML = "";
    for (const text of items) {
        const li = document.createElement("li");
        li.textContent = text;
        $(id).appendChild(li);
    }
}

function setProgress(p) {
    const pct = p.total === 0 ? 100 : Math.round((p.processed / p.total) * 100);
    $("bar").style.width = pct + "%";
    $("progress-text").textContent = "Processed " + p.processed + "/" + p.total;
}

function watchProgress() {
    return new Promise((resolve) => {
        const scheme = location.protocol === "https:" ? "wss://" : "ws://";
        const socket = new WebSocket(scheme + location.host + "/api/sessions/" + sessionId + "/progress");
        socket.onmessage = (event) => {
            const p = JSON.parse(event.data);
            setProgress(p);
            if (p.finished) { socket.close(); resolve(); }
        };
        socket.onclose = () => resolve();
        socket.onerror = () => resolve();
    });
}

async function waitUntilDone() {
    await watchProgress();
    for (;;) {
        const status = await api("GET", "/api/sessions/" + sessionId);
        if (status.phase !== "processing") { return status; }
        await new Promise((r) => setTimeout(r, 500));
    }
}

function showResult(status) {
    show("progress-card", false);
    if (status.phase === "ready") {
        const report = status.report;
        $("summary").textContent = status.summary;
        listItems("failed", report.failed.map((f) =>
            f.file + ": " + f.reason + (f.stored_as ? " (stored as " + f.stored_as + ")" : " (kept original name)")));
        $("download").href = "/api/sessions/" + sessionId + "/download";
        $("download").setAttribute("download", archiveName);
        show("result-card", true);
    } else if (status.last_error) {
        $("message").textContent = status.last_error;
    }
    $("process").disabled = false;
}

$("upload-form").addEventListener("submit", async (event) => {
    event.preventDefault();
    $("message").textContent = "";
    listItems("rejected", []);
    const files = $("files").files;
    if (files.length === 0) {
        $("message").textContent = "Choose one or more images first.";
        return;
    }

    $("process").disabled = true;
    try {
        const form = new FormData();
        for (const file of files) { form.append("files", file, file.name); }
        const summary = await api("POST", "/api/sessions/" + sessionId + "/files", form);
        listItems("rejected", summary.rejected.map((r) => r.file + ": " + r.reason));
        if (summary.accepted.length === 0) { $("process").disabled = false; return; }

        setProgress({ processed: 0, total: summary.pending });
        show("progress-card", true);
        show("result-card", false);
        await api("POST", "/api/sessions/" + sessionId + "/process");
        showResult(await waitUntilDone());
    } catch (err) {
        $("message").textContent = err.message;
        $("process").disabled = false;
    }
});

$("cancel").addEventListener("click", () => {
    api("POST", "/api/sessions/" + sessionId + "/cancel").catch((err) => {
        $("message").textContent = err.message;
    });
});

$("download").addEventListener("click", () => {
    // The server resets the session once the archive is served
    setTimeout(() => {
        $("upload-form").reset();
        show("result-card", false);
    }, 500);
});

newSession().catch((err) => { $("message").textContent = err.message; });
</script>
</body>
</html>
"##;

/// Render the upload page
pub fn render_index(config: &AppConfig) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("index.html", INDEX_TEMPLATE)?;

    let accept: Vec<String> = config.rules.allowed_extensions.iter()
        .map(|e| format!(".{}", e))
        .collect();

    let html = env.get_template("index.html")?.render(context! {
        accept => accept.join(","),
        extensions => config.rules.allowed_extensions.join(", "),
        max_upload_mb => config.web.max_upload_mb,
        labels => &config.classifier.labels,
        archive_name => &config.archive.file_name,
    })?;

    Ok(html)
}
