use serde::{Deserialize, Serialize};

/// Name of the host function the page-side recorder emits into.
pub const BRIDGE_FUNCTION: &str = "sendRRWebEvent";

/// Vendor-bundled recorder library, served by the host.
pub const RECORDER_BUNDLE_PATH: &str = "/vendor/rrweb/rrweb.min.js";

/// Recorder start options, applied verbatim. The recorder treats these as an
/// opaque configuration object; field names follow its JS API.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecorderOptions {
    pub checkout_every_nms: u64,
    pub sampling: SamplingOptions,
    #[serde(rename = "slimDOMOptions")]
    pub slim_dom_options: SlimDomOptions,
    pub mask_input_options: MaskInputOptions,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SamplingOptions {
    pub scroll: u64,
    pub media: u64,
    pub input: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlimDomOptions {
    pub script: bool,
    pub comment: bool,
    pub head_favicon: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MaskInputOptions {
    pub password: bool,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            checkout_every_nms: 5000,
            sampling: SamplingOptions {
                scroll: 100,
                media: 400,
                input: "last".to_string(),
            },
            slim_dom_options: SlimDomOptions {
                script: false,
                comment: false,
                head_favicon: false,
            },
            mask_input_options: MaskInputOptions { password: true },
        }
    }
}

/// Page-side bootstrap: bind the emit function to the bridge, load the
/// vendored recorder, start it with the given options. Idempotent per
/// document; a navigation produces a fresh document, so the host re-runs it.
pub fn injection_script(options: &RecorderOptions) -> String {
    let options_json =
        serde_json::to_string(options).expect("recorder options serialize to JSON");
    format!(
        r#"(() => {{
    if (window.__vstreamRecorderActive) {{ return 'already-active'; }}
    window.__vstreamRecorderActive = true;
    const emit = (event) => {{
        try {{ window.{bridge}(JSON.stringify(event)); }} catch (err) {{}}
    }};
    const boot = () => {{
        const options = {options};
        options.emit = emit;
        window.rrweb.record(options);
    }};
    if (window.rrweb && window.rrweb.record) {{
        boot();
        return 'started';
    }}
    const script = document.createElement('script');
    script.src = '{bundle}';
    script.onload = boot;
    document.head.appendChild(script);
    return 'loading';
}})()"#,
        bridge = BRIDGE_FUNCTION,
        options = options_json,
        bundle = RECORDER_BUNDLE_PATH,
    )
}
