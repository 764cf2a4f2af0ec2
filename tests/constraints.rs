use cmip_replica::constraints::{ConstraintSet, matches};
use cmip_replica::domain::{VarMip, parse_identifier};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn groups_are_ored_within_and_anded_across() {
    let identifier = parse_identifier("/x/tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc").unwrap();

    let either_variable = ConstraintSet::new(
        strings(&["pr", "tas"]),
        Vec::new(),
        strings(&["rcp45"]),
        Vec::new(),
    );
    assert!(matches(&identifier, &either_variable));

    let wrong_experiment = ConstraintSet::new(
        strings(&["pr", "tas"]),
        Vec::new(),
        strings(&["historical"]),
        Vec::new(),
    );
    assert!(!matches(&identifier, &wrong_experiment));

    let wrong_model = ConstraintSet::new(
        Vec::new(),
        strings(&["MIROC5"]),
        Vec::new(),
        Vec::new(),
    );
    assert!(!wrong_model.matches(&identifier));
}

#[test]
fn empty_constraints_match_everything() {
    let identifier = parse_identifier("/x/orog_fx_CCSM4_historical_r0i0p0.nc").unwrap();
    let constraints = ConstraintSet::default();
    assert!(constraints.is_unconstrained());
    assert!(matches(&identifier, &constraints));
}

#[test]
fn frequency_selects_tables() {
    let monthly = ConstraintSet::default().with_frequencies(["mon"]);
    let amon = parse_identifier("/x/tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc").unwrap();
    let daily = parse_identifier("/x/tas_day_CCSM4_rcp45_r1i1p1_20060101-20101231.nc").unwrap();
    assert!(monthly.matches(&amon));
    assert!(!monthly.matches(&daily));

    let unknown = ConstraintSet::default().with_frequencies(["fortnightly"]);
    assert!(unknown.is_unconstrained());
}

#[test]
fn var_mip_keys_constrain_both_fields() {
    let keys = [VarMip::new("tas", "Amon"), VarMip::new("pr", "day")];
    let constraints = ConstraintSet::from_var_mips(&keys);
    let tas_amon = parse_identifier("/x/tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc").unwrap();
    let tos_omon = parse_identifier("/x/tos_Omon_CCSM4_rcp45_r1i1p1_200601-210012.nc").unwrap();
    assert!(constraints.matches(&tas_amon));
    assert!(!constraints.matches(&tos_omon));
}
