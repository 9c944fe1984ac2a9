//! Constructors for the user aggregate and its proxy records.

use crate::messages::{Proxy, Shadowsocks, Trojan, User, Vless, Vmess};

pub fn vmess(id: impl Into<String>) -> Vmess {
    Vmess { id: id.into() }
}

pub fn vless(id: impl Into<String>, flow: impl Into<String>) -> Vless {
    Vless {
        id: id.into(),
        flow: flow.into(),
    }
}

pub fn trojan(password: impl Into<String>) -> Trojan {
    Trojan {
        password: password.into(),
    }
}

pub fn shadowsocks(password: impl Into<String>, method: impl Into<String>) -> Shadowsocks {
    Shadowsocks {
        password: password.into(),
        method: method.into(),
    }
}

/// Bundle proxy records; any of them may be absent
pub fn proxies(
    vmess: Option<Vmess>,
    vless: Option<Vless>,
    trojan: Option<Trojan>,
    shadowsocks: Option<Shadowsocks>,
) -> Proxy {
    Proxy {
        vmess,
        vless,
        trojan,
        shadowsocks,
    }
}

pub fn user(email: impl Into<String>, proxies: Proxy, inbounds: Vec<String>) -> User {
    User {
        email: email.into(),
        proxies: Some(proxies),
        inbounds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_user_carries_all_proxy_records() {
        let u = user(
            "alice",
            proxies(
                Some(vmess("a-uuid")),
                Some(vless("b-uuid", "xtls-rprx-vision")),
                Some(trojan("secret")),
                Some(shadowsocks("pw", "aes-256-gcm")),
            ),
            vec!["VLESS TCP".to_string()],
        );

        let p = u.proxies.as_ref().unwrap();
        assert_eq!(p.vmess.as_ref().unwrap().id, "a-uuid");
        assert_eq!(p.vless.as_ref().unwrap().flow, "xtls-rprx-vision");
        assert_eq!(p.trojan.as_ref().unwrap().password, "secret");
        assert_eq!(p.shadowsocks.as_ref().unwrap().method, "aes-256-gcm");
        assert_eq!(u.inbounds, vec!["VLESS TCP".to_string()]);
    }

    #[test]
    fn test_user_survives_protobuf_encoding() {
        let u = user("bob", proxies(None, None, Some(trojan("x")), None), vec![]);
        let decoded = User::decode(u.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, u);
        assert!(decoded.proxies.unwrap().vmess.is_none());
    }
}
