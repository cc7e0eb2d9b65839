//! Test-harness helpers: settings selection from the environment.
//!
//! Scenario suites run the same topology under every network type; the
//! `LSCTL_NETTYPE` variable picks which one without recompiling.

use crate::{new_direct, new_vlan, new_vxlan_e2e, new_vxlan_mcast, new_vxlan_static};
use netfab_model::{Context, SettingsId};

/// Nettype names accepted in `LSCTL_NETTYPE`.
pub const NETTYPE_VAR: &str = "LSCTL_NETTYPE";

/// Creates the settings selected by `LSCTL_NETTYPE`.
///
/// # Panics
///
/// Panics when the variable is unset or names an unknown type; a
/// misconfigured harness should fail loudly.
pub fn settings_from_env(ctx: &mut Context) -> SettingsId {
    let nettype = std::env::var(NETTYPE_VAR)
        .unwrap_or_else(|_| panic!("no {NETTYPE_VAR} in the environment"));
    settings_by_nettype(ctx, &nettype)
        .unwrap_or_else(|| panic!("unknown nettype: {nettype}"))
}

/// Creates the settings for a nettype name, `None` for unknown names.
pub fn settings_by_nettype(ctx: &mut Context, nettype: &str) -> Option<SettingsId> {
    match nettype {
        "vlan" => Some(new_vlan(ctx)),
        "vxlan/e2e" => Some(new_vxlan_e2e(ctx, 0)),
        "vxlan/static" => Some(new_vxlan_static(ctx, 0)),
        "vxlan/mcast" => Some(new_vxlan_mcast(
            ctx,
            "239.239.239.239".parse().expect("well-formed literal"),
            0,
        )),
        "direct" => Some(new_direct(ctx)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netfab_model::{NetClass, SwitchType};

    #[test]
    fn test_every_nettype_constructs() {
        let mut ctx = Context::new("t").unwrap();
        for (name, class, switch) in [
            ("vlan", NetClass::Vlan, SwitchType::Learning),
            ("vxlan/e2e", NetClass::Vxlan, SwitchType::LearningE2E),
            ("vxlan/static", NetClass::Vxlan, SwitchType::StaticE2E),
            ("vxlan/mcast", NetClass::Vxlan, SwitchType::Learning),
            ("direct", NetClass::Direct, SwitchType::Learning),
        ] {
            let settings = settings_by_nettype(&mut ctx, name).unwrap();
            assert_eq!(ctx.settings(settings).nettype.class(), class);
            assert_eq!(ctx.settings(settings).switch_type, switch);
        }
        assert!(settings_by_nettype(&mut ctx, "geneve").is_none());
    }
}
