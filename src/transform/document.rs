//! Executable-document shell shared by every transform.
//!
//! Every artifact is a complete HTML document: the console-capture shim runs
//! first, user content follows, and a final script reports `ready` once the
//! document's synchronous scripts have finished. From then on the shim sends
//! a heartbeat every second while the event loop stays free. The shim speaks
//! the channel protocol through `globalThis.__previewHost.send` when the
//! preview host provides it and falls back to `postMessage` towards an
//! embedding frame.

/// Console-capture and error-reporting shim injected into every document.
pub const CONSOLE_SHIM: &str = r#"(function () {
  "use strict";
  var host = globalThis.__previewHost;
  var inputHandlers = [];
  function emit(method, params) {
    var message = { method: method, params: params };
    if (host && typeof host.send === "function") {
      host.send(JSON.stringify(message));
    } else if (typeof window !== "undefined" && window.parent && window.parent !== window) {
      window.parent.postMessage(message, "*");
    }
  }
  function render(value) {
    if (typeof value === "string") { return value; }
    if (value instanceof Error) { return String(value); }
    try { return JSON.stringify(value); } catch (e) { return String(value); }
  }
  ["log", "info", "warn", "error", "debug"].forEach(function (level) {
    var original = console[level];
    console[level] = function () {
      var text = Array.prototype.map.call(arguments, render).join(" ");
      emit("console", { level: level, text: text });
      if (typeof original === "function") { original.apply(console, arguments); }
    };
  });
  if (typeof globalThis.addEventListener === "function") {
    globalThis.addEventListener("error", function (event) {
      var error = event.error;
      emit("error", {
        message: String(event.message || error || "Script error"),
        stack: error && error.stack ? String(error.stack) : null
      });
    });
    globalThis.addEventListener("unhandledrejection", function (event) {
      var reason = event.reason;
      emit("error", {
        message: "Unhandled promise rejection: " + render(reason && reason.message ? reason.message : reason),
        stack: reason && reason.stack ? String(reason.stack) : null
      });
    });
  }
  globalThis.onPreviewInput = function (handler) { inputHandlers.push(handler); };
  globalThis.__previewInput = function (payload) {
    inputHandlers.forEach(function (handler) { handler(payload); });
  };
  globalThis.__previewReady = function () {
    emit("ready", {});
    if (typeof setInterval === "function") {
      setInterval(function () { emit("heartbeat", {}); }, 1000);
    }
  };
})();"#;

/// Final script reporting that initial synchronous execution finished.
const READY_SCRIPT: &str = "__previewReady();";

/// Assemble a complete executable document.
///
/// `head` and `body` are inserted verbatim; callers escape anything they
/// wrap in `<script>` or `<style>` elements.
#[must_use]
pub fn build_document(head: &str, body: &str) -> String {
    let mut doc = String::with_capacity(CONSOLE_SHIM.len() + head.len() + body.len() + 256);
    doc.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    doc.push_str(
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
    );
    doc.push_str("<script>\n");
    doc.push_str(CONSOLE_SHIM);
    doc.push_str("\n</script>\n");
    if !head.is_empty() {
        doc.push_str(head);
        doc.push('\n');
    }
    doc.push_str("</head>\n<body>\n");
    if !body.is_empty() {
        doc.push_str(body);
        doc.push('\n');
    }
    doc.push_str("<script>");
    doc.push_str(READY_SCRIPT);
    doc.push_str("</script>\n</body>\n</html>\n");
    doc
}

/// Wrap code in a `<script>` element, escaping premature end tags.
#[must_use]
pub fn script_element(code: &str) -> String {
    format!("<script>\n{}\n</script>", escape_end_tag(code, "script"))
}

/// Wrap CSS in a `<style>` element, escaping premature end tags.
#[must_use]
pub fn style_element(css: &str) -> String {
    format!("<style>\n{}\n</style>", escape_end_tag(css, "style"))
}

/// Replace every case-insensitive `</tag` with `<\/tag` and every `<!--`
/// with `<\!--` so embedded text cannot close its element early.
#[must_use]
pub fn escape_end_tag(text: &str, tag: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let needle = format!("</{}", tag.to_ascii_lowercase());
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if lower[i..].starts_with(&needle) {
            out.push_str("<\\/");
            out.push_str(&text[i + 2..i + needle.len()]);
            i += needle.len();
        } else if lower[i..].starts_with("<!--") {
            out.push_str("<\\!--");
            i += 4;
        } else {
            let ch = text[i..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&text[i..i + ch]);
            i += ch;
        }
    }
    out
}
