//! Extractors for the text and XML bodies the platform returns.
//!
//! Login endpoints and sync-check answer with small JavaScript snippets; the
//! login redirect answers with an XML document. None of them are JSON.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::error::{ClientError, Result};
use crate::types::LocationInfo;

lazy_static! {
    static ref UUID_RE: Regex =
        Regex::new(r#"window\.QRLogin\.code = 200; window\.QRLogin\.uuid = "([^"]+)""#)
            .expect("valid uuid regex");
    static ref REDIRECT_RE: Regex =
        Regex::new(r#"window\.redirect_uri="([^"]+)";"#).expect("valid redirect regex");
    static ref SCAN_RE: Regex =
        Regex::new(r#"window\.code=201;window\.userAvatar = '([^']*)';"#)
            .expect("valid scan regex");
    static ref SYNC_CHECK_RE: Regex =
        Regex::new(r#"window\.synccheck=\{retcode:"(\d+)",selector:"(\d+)"\}"#)
            .expect("valid synccheck regex");
    static ref LOCATION_RE: Regex =
        Regex::new(r#"<location x="([^"]*)" y="([^"]*)" scale="[^"]*" label="([^"]*)""#)
            .expect("valid location regex");
    static ref LOCATION_IMG_RE: Regex =
        Regex::new(r#"(/cgi-bin/mmwebwx-bin/webwxgetpubliclinkimg\?[^\s"'<>]+)"#)
            .expect("valid location image regex");
}

/// Result of one login-poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStatus {
    /// Scanned on the phone, waiting for confirmation.
    PendingScan { avatar: String },
    /// Confirmed; follow the redirect to obtain credentials.
    Confirmed { redirect_url: String },
    /// Nothing happened before the server released the poll.
    Pending,
}

/// Tokens carried by the login credential document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTokens {
    pub session_id: String,
    pub uin: String,
    pub session_key: String,
    pub pass_ticket: String,
}

/// Pull the login uuid out of the jslogin response.
pub fn parse_uuid(body: &str) -> Result<String> {
    UUID_RE
        .captures(body)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| ClientError::protocol("login uuid missing from jslogin response"))
}

pub fn parse_login_status(body: &str) -> LoginStatus {
    if let Some(caps) = REDIRECT_RE.captures(body) {
        return LoginStatus::Confirmed {
            redirect_url: caps[1].to_string(),
        };
    }
    if let Some(caps) = SCAN_RE.captures(body) {
        return LoginStatus::PendingScan {
            avatar: caps[1].to_string(),
        };
    }
    LoginStatus::Pending
}

/// Text of the first `<tag>` element with the predefined entities decoded.
fn xml_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(unescape_xml(&xml[start..end]))
}

fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    // `&amp;` last, so `&amp;lt;` stays `&lt;`.
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse the credential document returned by the login redirect.
///
/// A present, non-zero `<ret>` is an auth rejection; any missing token is a
/// protocol error.
pub fn parse_login_xml(xml: &str) -> Result<LoginTokens> {
    if let Some(ret) = xml_tag(xml, "ret") {
        let code = ret.trim().parse::<i64>().unwrap_or(-1);
        if code != 0 {
            return Err(ClientError::Auth {
                stage: "login redirect",
                code,
            });
        }
    }

    let required = |tag: &str| -> Result<String> {
        match xml_tag(xml, tag) {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(ClientError::protocol(format!(
                "login document is missing <{tag}>"
            ))),
        }
    };

    Ok(LoginTokens {
        session_id: required("wxsid")?,
        uin: required("wxuin")?,
        session_key: required("skey")?,
        pass_ticket: required("pass_ticket")?,
    })
}

/// Decode `(retcode, selector)` from a sync-check body.
///
/// `None` means the body carried no status, which is not an error.
pub fn parse_sync_check(body: &str) -> Option<(String, String)> {
    SYNC_CHECK_RE
        .captures(body)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

/// Host (with any explicit port) of a URL, falling back to `default` when
/// the URL does not parse or has no host.
pub fn host_of(url: &str, default: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return default.to_string();
    };
    match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) if !host.is_empty() => format!("{host}:{port}"),
        (Some(host), None) if !host.is_empty() => host.to_string(),
        _ => default.to_string(),
    }
}

/// Extract coordinates, label and map preview from a location share.
///
/// Anything that fails to parse is left empty.
pub fn parse_location(ori_content: &str, content: &str, host: &str) -> LocationInfo {
    let mut info = LocationInfo::default();
    if let Some(caps) = LOCATION_RE.captures(ori_content) {
        info.x = caps[1].to_string();
        info.y = caps[2].to_string();
        info.label = caps[3].to_string();
    }
    if let Some(caps) = LOCATION_IMG_RE.captures(content) {
        info.image_url = format!("https://{host}{}", &caps[1]);
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let body = r#"window.QRLogin.code = 200; window.QRLogin.uuid = "Ab12_Cd==";"#;
        assert_eq!(parse_uuid(body).unwrap(), "Ab12_Cd==");
    }

    #[test]
    fn test_parse_uuid_missing_is_protocol_error() {
        let err = parse_uuid("window.QRLogin.code = 400;").unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_parse_login_status() {
        assert_eq!(
            parse_login_status(
                r#"window.code=200;
window.redirect_uri="https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T&uuid=U&scan=1";"#
            ),
            LoginStatus::Confirmed {
                redirect_url:
                    "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T&uuid=U&scan=1"
                        .into()
            }
        );
        assert_eq!(
            parse_login_status("window.code=201;window.userAvatar = 'data:img/jpg;base64,xx';"),
            LoginStatus::PendingScan {
                avatar: "data:img/jpg;base64,xx".into()
            }
        );
        assert_eq!(parse_login_status("window.code=408;"), LoginStatus::Pending);
    }

    #[test]
    fn test_parse_login_xml() {
        let xml = "<error><ret>0</ret><message></message><skey>@crypt_1</skey>\
                   <wxsid>SID</wxsid><wxuin>123</wxuin><pass_ticket>PT%2B</pass_ticket>\
                   <isgrayscale>1</isgrayscale></error>";
        let tokens = parse_login_xml(xml).unwrap();
        assert_eq!(tokens.session_id, "SID");
        assert_eq!(tokens.uin, "123");
        assert_eq!(tokens.session_key, "@crypt_1");
        assert_eq!(tokens.pass_ticket, "PT%2B");
    }

    #[test]
    fn test_parse_login_xml_decodes_entities() {
        let xml = "<error><ret>0</ret><skey>@k</skey><wxsid>S</wxsid><wxuin>1</wxuin>\
                   <pass_ticket>a&amp;b&lt;c&amp;lt;</pass_ticket></error>";
        let tokens = parse_login_xml(xml).unwrap();
        assert_eq!(tokens.pass_ticket, "a&b<c&lt;");
    }

    #[test]
    fn test_parse_login_xml_errors() {
        let rejected = parse_login_xml("<error><ret>1203</ret><message>no</message></error>");
        assert!(matches!(
            rejected,
            Err(ClientError::Auth { code: 1203, .. })
        ));

        let missing = parse_login_xml("<error><ret>0</ret><skey>k</skey></error>");
        assert!(matches!(missing, Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_parse_sync_check() {
        assert_eq!(
            parse_sync_check(r#"window.synccheck={retcode:"0",selector:"2"}"#),
            Some(("0".into(), "2".into()))
        );
        assert_eq!(parse_sync_check("<html>busy</html>"), None);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://wx.qq.com/cgi-bin/mmwebwx-bin/x?a=1", "wx2.qq.com"),
            "wx.qq.com"
        );
        assert_eq!(host_of("https://wx8.qq.com?x", "wx2.qq.com"), "wx8.qq.com");
        assert_eq!(
            host_of("https://user:pw@wx.qq.com/cgi-bin/mmwebwx-bin/x", "wx2.qq.com"),
            "wx.qq.com"
        );
        assert_eq!(host_of("https://wx.qq.com:8443/x", "wx2.qq.com"), "wx.qq.com:8443");
        assert_eq!(host_of("", "wx2.qq.com"), "wx2.qq.com");
        assert_eq!(host_of("not a url", "wx2.qq.com"), "wx2.qq.com");
    }

    #[test]
    fn test_parse_location() {
        let ori = r#"<?xml version="1.0"?><msg><location x="39.9" y="116.3" scale="16" label="Beijing" maptype="0" poiname="[位置]" poiid="" /></msg>"#;
        let content = "Beijing:<br/>/cgi-bin/mmwebwx-bin/webwxgetpubliclinkimg?url=xxx&msgid=1&pictype=location";
        let info = parse_location(ori, content, "wx.qq.com");
        assert_eq!(info.x, "39.9");
        assert_eq!(info.y, "116.3");
        assert_eq!(info.label, "Beijing");
        assert_eq!(
            info.image_url,
            "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxgetpubliclinkimg?url=xxx&msgid=1&pictype=location"
        );
    }

    #[test]
    fn test_parse_location_failure_leaves_fields_empty() {
        let info = parse_location("garbage", "no image", "wx.qq.com");
        assert_eq!(info, LocationInfo::default());
    }
}
