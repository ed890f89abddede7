//! One-time notices carried in a dedicated cookie: a redirect queues a
//! notice, the next rendered page shows it and deletes the cookie.

use actix_web::dev::HttpResponseBuilder;
use actix_web::http::Cookie;
use actix_web::{HttpMessage, HttpRequest, HttpResponse};

const COOKIE_NAME: &str = "notice";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notice {
    InvalidInput,
    ItemCreated,
    ItemUpdated,
    ItemDeleted,
    SettingUpdated,
    LoginSuccess,
    BadCredentials,
    Goodbye,
}

impl Notice {
    // Stable codes kept cookie-safe; the message is only rendered server-side.
    fn code(self) -> &'static str {
        match self {
            Notice::InvalidInput => "invalid-input",
            Notice::ItemCreated => "item-created",
            Notice::ItemUpdated => "item-updated",
            Notice::ItemDeleted => "item-deleted",
            Notice::SettingUpdated => "setting-updated",
            Notice::LoginSuccess => "login-success",
            Notice::BadCredentials => "bad-credentials",
            Notice::Goodbye => "goodbye",
        }
    }

    fn from_code(code: &str) -> Option<Notice> {
        Some(match code {
            "invalid-input" => Notice::InvalidInput,
            "item-created" => Notice::ItemCreated,
            "item-updated" => Notice::ItemUpdated,
            "item-deleted" => Notice::ItemDeleted,
            "setting-updated" => Notice::SettingUpdated,
            "login-success" => Notice::LoginSuccess,
            "bad-credentials" => Notice::BadCredentials,
            "goodbye" => Notice::Goodbye,
            _ => return None,
        })
    }

    pub fn message(self) -> &'static str {
        match self {
            Notice::InvalidInput => "Invalid input.",
            Notice::ItemCreated => "Item created",
            Notice::ItemUpdated => "Item updated",
            Notice::ItemDeleted => "Item deleted.",
            Notice::SettingUpdated => "Setting updated.",
            Notice::LoginSuccess => "Login success.",
            Notice::BadCredentials => "Invalid username or password.",
            Notice::Goodbye => "Goodbye.",
        }
    }
}

fn cookie(value: &'static str) -> Cookie<'static> {
    Cookie::build(COOKIE_NAME, value).path("/").finish()
}

/// 302 to `location` with a notice queued for the next rendered page.
pub fn redirect_with(location: &str, notice: Notice) -> HttpResponse {
    HttpResponse::Found()
        .header("location", location)
        .cookie(cookie(notice.code()))
        .finish()
}

/// 302 to `location` without touching any queued notice.
pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().header("location", location).finish()
}

/// Consumes the queued notice, if any: the cookie is deleted on the
/// response being built, so the message renders exactly once.
pub fn take(req: &HttpRequest, builder: &mut HttpResponseBuilder) -> Option<&'static str> {
    let queued = req.cookie(COOKIE_NAME)?;
    // Request cookies carry no path attribute; restore it so the removal
    // matches the stored cookie even on multi-segment pages.
    let mut removal = queued.clone();
    removal.set_path("/");
    builder.del_cookie(&removal);
    Notice::from_code(queued.value()).map(Notice::message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for notice in &[
            Notice::InvalidInput,
            Notice::ItemCreated,
            Notice::ItemUpdated,
            Notice::ItemDeleted,
            Notice::SettingUpdated,
            Notice::LoginSuccess,
            Notice::BadCredentials,
            Notice::Goodbye,
        ] {
            assert_eq!(Notice::from_code(notice.code()), Some(*notice));
        }
    }

    #[test]
    fn unknown_code_is_ignored() {
        assert_eq!(Notice::from_code("tampered"), None);
    }

    #[test]
    fn redirect_sets_location_and_cookie() {
        let resp = redirect_with("/", Notice::ItemCreated);
        assert_eq!(resp.status(), actix_web::http::StatusCode::FOUND);
        assert_eq!(resp.headers().get("location").unwrap(), "/");
        let queued = resp.cookies().find(|c| c.name() == COOKIE_NAME).unwrap();
        assert_eq!(queued.value(), "item-created");
    }
}
