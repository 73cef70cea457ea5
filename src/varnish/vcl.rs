//! Companion Varnish configuration generator.
//!
//! Renders the VCL document that makes the purge client's wire dialect
//! work: the purge ACL, the regex ban rule matched against the recorded
//! `x-url` response header, pass rules for the Varnish-side exclusions,
//! static-asset TTLs, and stripping of the internal tracking header before
//! delivery. Generated once and deployed out-of-band; never evaluated at
//! runtime.

use std::fmt::Write;

use crate::config::VarnishSettings;

const STATIC_ASSET_PATTERN: &str = r"\.(gif|jpg|jpeg|png|ico|css|js)$";
const DEVICE_PATTERN: &str = "(?i)mobile|android|iphone|ipad|tablet";

/// Render the full VCL 4.0 document for the given settings.
pub fn generate(settings: &VarnishSettings) -> String {
    let mut vcl = String::with_capacity(4096);

    vcl.push_str("vcl 4.0;\n\nimport std;\n\n");

    let _ = write!(
        vcl,
        r#"# Default backend definition
backend default {{
    .host = "{host}";
    .port = "{port}";
    .first_byte_timeout = 300s;
    .connect_timeout = 5s;
    .between_bytes_timeout = 2s;
}}

"#,
        host = settings.backend_host,
        port = settings.backend_port,
    );

    vcl.push_str("# ACL for purge requests\nacl purge {\n");
    for entry in &settings.purge_acl {
        let _ = writeln!(vcl, "    \"{entry}\";");
    }
    vcl.push_str("}\n\n");

    let _ = write!(
        vcl,
        r#"sub vcl_recv {{
    # Handle {method} requests
    if (req.method == "{method}") {{
        if (!client.ip ~ purge) {{
            return(synth(405, "Not allowed."));
        }}
        if (req.http.X-Purge-Method == "regex") {{
            ban("obj.http.x-url ~ " + req.url);
            return(synth(200, "Banned"));
        }}
        return (purge);
    }}

"#,
        method = settings.purge_method,
    );

    if !settings.excluded_paths.is_empty() {
        let conditions = settings
            .excluded_paths
            .iter()
            .map(|path| format!("req.url ~ \"{path}\""))
            .collect::<Vec<_>>()
            .join(" ||\n        ");
        let _ = write!(
            vcl,
            r#"    # Skip cache for excluded paths
    if ({conditions}) {{
        return (pass);
    }}

"#,
        );
    }

    if !settings.excluded_params.is_empty() {
        let params = settings.excluded_params.join("|");
        let _ = write!(
            vcl,
            r#"    # Skip cache for excluded parameters
    if (req.url ~ "[?&]({params})=") {{
        return (pass);
    }}

"#,
        );
    }

    let _ = write!(
        vcl,
        r#"    # Strip cookies for static files
    if (req.url ~ "{STATIC_ASSET_PATTERN}") {{
        unset req.http.Cookie;
    }}

    # Handle mobile devices
    if (req.http.User-Agent ~ "{DEVICE_PATTERN}") {{
        set req.http.X-Device = "mobile";
    }} else {{
        set req.http.X-Device = "desktop";
    }}
}}

sub vcl_backend_response {{
    # Cache static files for 7 days
    if (bereq.url ~ "{STATIC_ASSET_PATTERN}") {{
        set beresp.ttl = 7d;
        set beresp.grace = 24h;
        unset beresp.http.Set-Cookie;
    }}

    # Don't cache if backend sends no-cache headers
    if (beresp.http.Cache-Control ~ "no-cache|no-store|private" ||
        beresp.http.Pragma == "no-cache") {{
        set beresp.ttl = 0s;
        set beresp.uncacheable = true;
    }}

    # Store the URL for purging
    set beresp.http.x-url = bereq.url;
}}

"#,
    );

    vcl.push_str(
        r#"sub vcl_deliver {
    # Remove internal headers before delivery
    unset resp.http.x-url;

    # Add debug headers
    if (obj.hits > 0) {
        set resp.http.X-Cache = "HIT";
        set resp.http.X-Cache-Hits = obj.hits;
    } else {
        set resp.http.X-Cache = "MISS";
    }
}

sub vcl_hit {
    if (obj.ttl >= 0s) {
        return (deliver);
    }
    return (fetch);
}

sub vcl_miss {
    return (fetch);
}
"#,
    );

    vcl
}
