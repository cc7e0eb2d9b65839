//! Scenario tests for the commit engine: driver call sequences,
//! idempotence, and teardown ordering.

mod common;

use common::{call_log, recording_settings, recording_vxlan_static, DriverCall};
use netfab_model::{Context, Error, State};
use pretty_assertions::assert_eq;

fn no_problems(problem: &netfab_model::Problem) {
    panic!("unexpected problem: {problem}");
}

#[test]
fn single_host_direct_net() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys = ctx.new_phys();
    ctx.phys_set_iface(phys, "lo").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();

    let virt = ctx.new_virt(net);
    ctx.virt_set_mac(virt, "02:00:00:00:00:01".parse().unwrap())
        .unwrap();
    ctx.virt_connect(virt, phys, "lo").unwrap();

    ctx.commit(no_problems).unwrap();

    let pa = ctx.phys(phys).attachments[0];
    assert_eq!(
        *calls.borrow(),
        vec![DriverCall::CreatePa(pa), DriverCall::AddVirt(virt)]
    );
    assert_eq!(ctx.virt(virt).state, State::Ok);
    assert_eq!(ctx.virt(virt).committed_to, Some(pa));
}

#[test]
fn commit_is_idempotent() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys = ctx.new_phys();
    ctx.phys_set_iface(phys, "lo").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();

    let virt = ctx.new_virt(net);
    ctx.virt_connect(virt, phys, "lo").unwrap();

    ctx.commit(no_problems).unwrap();
    let after_first = calls.borrow().len();

    // No model change in between: the second commit must not invoke
    // the driver at all.
    ctx.commit(no_problems).unwrap();
    assert_eq!(calls.borrow().len(), after_first);
}

#[test]
fn cross_host_vxlan_static() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_vxlan_static(&mut ctx, &calls, 4789);
    let net = ctx.new_net(settings, 100);

    let host_a = ctx.new_phys();
    ctx.phys_set_iface(host_a, "lo").unwrap();
    ctx.phys_set_ip(host_a, "10.0.0.1".parse().unwrap()).unwrap();
    ctx.phys_claim_local(host_a).unwrap();
    ctx.phys_attach(host_a, net).unwrap();

    let host_b = ctx.new_phys();
    ctx.phys_set_ip(host_b, "10.0.0.2".parse().unwrap()).unwrap();
    ctx.phys_attach(host_b, net).unwrap();

    let virt_b = ctx.new_virt(net);
    ctx.virt_set_mac(virt_b, "02:00:00:00:00:02".parse().unwrap())
        .unwrap();
    ctx.virt_connect(virt_b, host_b, "tap-b").unwrap();

    ctx.commit(no_problems).unwrap();

    let pa_a = ctx.phys(host_a).attachments[0];
    let pa_b = ctx.phys(host_b).attachments[0];
    assert_eq!(
        *calls.borrow(),
        vec![
            DriverCall::CreatePa(pa_a),
            DriverCall::AddRemotePa {
                local: pa_a,
                remote: pa_b
            },
            DriverCall::AddRemoteVirt {
                local: pa_a,
                virt: virt_b
            },
        ]
    );
    // The remote virt is realized through views only, never locally.
    assert!(!calls.borrow().contains(&DriverCall::AddVirt(virt_b)));
}

#[test]
fn teardown_order_is_reverse_of_buildup() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_vxlan_static(&mut ctx, &calls, 4789);
    let net = ctx.new_net(settings, 100);

    let host_a = ctx.new_phys();
    ctx.phys_set_iface(host_a, "lo").unwrap();
    ctx.phys_set_ip(host_a, "10.0.0.1".parse().unwrap()).unwrap();
    ctx.phys_claim_local(host_a).unwrap();
    ctx.phys_attach(host_a, net).unwrap();

    let host_b = ctx.new_phys();
    ctx.phys_set_ip(host_b, "10.0.0.2".parse().unwrap()).unwrap();
    ctx.phys_attach(host_b, net).unwrap();

    let virt_a = ctx.new_virt(net);
    ctx.virt_connect(virt_a, host_a, "lo").unwrap();
    let virt_b = ctx.new_virt(net);
    ctx.virt_connect(virt_b, host_b, "tap-b").unwrap();

    ctx.commit(no_problems).unwrap();
    calls.borrow_mut().clear();

    // Tear the whole net down.
    ctx.net_free(net);
    ctx.commit(no_problems).unwrap();

    let recorded = calls.borrow().clone();
    let position = |call: &DriverCall| {
        recorded
            .iter()
            .position(|recorded_call| recorded_call == call)
            .unwrap_or_else(|| panic!("missing call: {call:?}"))
    };

    let pa_a = recorded
        .iter()
        .find_map(|call| match call {
            DriverCall::DestroyPa(pa) => Some(*pa),
            _ => None,
        })
        .expect("local attachment destroyed");

    // Remote virts come down before their remote-pa view, which comes
    // down before the local anchor.
    let remote_virt = position(&DriverCall::RemoveRemoteVirt {
        local: pa_a,
        virt: virt_b,
    });
    let remote_pa = recorded
        .iter()
        .position(|call| matches!(call, DriverCall::RemoveRemotePa { .. }))
        .unwrap();
    let destroy = position(&DriverCall::DestroyPa(pa_a));
    assert!(remote_virt < remote_pa);
    assert!(remote_pa < destroy);

    // The local virt is removed before its anchor is destroyed.
    assert!(position(&DriverCall::RemoveVirt(virt_a)) < destroy);

    // Nothing survives the teardown.
    assert!(!ctx.net_alive(net));
    assert!(!ctx.virt_alive(virt_a));
    assert!(!ctx.virt_alive(virt_b));
}

#[test]
fn renewed_virt_is_rebuilt() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys = ctx.new_phys();
    ctx.phys_set_iface(phys, "lo").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();

    let virt = ctx.new_virt(net);
    ctx.virt_connect(virt, phys, "lo").unwrap();
    ctx.commit(no_problems).unwrap();
    assert_eq!(ctx.virt(virt).state, State::Ok);

    // Mutating a committed attribute forces RENEW...
    ctx.virt_set_mac(virt, "02:00:00:00:00:03".parse().unwrap())
        .unwrap();
    assert_eq!(ctx.virt(virt).state, State::Renew);

    // ...and the next commit rebuilds exactly this virt.
    calls.borrow_mut().clear();
    ctx.commit(no_problems).unwrap();
    assert_eq!(
        *calls.borrow(),
        vec![DriverCall::RemoveVirt(virt), DriverCall::AddVirt(virt)]
    );
    assert_eq!(ctx.virt(virt).state, State::Ok);
}

#[test]
fn validation_failure_leaves_data_plane_untouched() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys = ctx.new_phys();
    ctx.phys_set_iface(phys, "lo").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();

    let mac = "02:00:00:00:00:01".parse().unwrap();
    let virt_1 = ctx.new_virt(net);
    ctx.virt_set_mac(virt_1, mac).unwrap();
    let virt_2 = ctx.new_virt(net);
    ctx.virt_set_mac(virt_2, mac).unwrap();

    let mut problems = 0;
    let err = ctx.commit(|_| problems += 1).unwrap_err();
    assert!(matches!(err, Error::Validate { .. }));
    assert!(problems > 0);
    assert!(calls.borrow().is_empty());
}

#[test]
fn unclaiming_local_tears_down_and_stops_tracking() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys = ctx.new_phys();
    ctx.phys_set_iface(phys, "lo").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();
    ctx.commit(no_problems).unwrap();

    let pa = ctx.phys(phys).attachments[0];
    calls.borrow_mut().clear();

    ctx.phys_unclaim_local(phys).unwrap();
    ctx.commit(no_problems).unwrap();
    // The anchor created while local is destroyed exactly once...
    assert_eq!(*calls.borrow(), vec![DriverCall::DestroyPa(pa)]);

    // ...and a further commit does not destroy it again.
    calls.borrow_mut().clear();
    ctx.commit(no_problems).unwrap();
    assert_eq!(*calls.borrow(), Vec::<DriverCall>::new());
}
