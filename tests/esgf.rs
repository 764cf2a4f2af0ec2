use std::collections::BTreeSet;

use cmip_replica::domain::VarMip;
use cmip_replica::esgf::{Node, SearchQuery, parse_script};

const SCRIPT: &str = r#"#!/bin/bash
##############################################################################
# ESG Federation download script
##############################################################################
download_files="$(cat <<EOF--dataset.file.url.chksum_type.chksum
'tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc' 'http://tds.ucar.edu/thredds/fileServer/datazone/cmip5_data/cmip5/output1/NCAR/CCSM4/rcp45/mon/atmos/Amon/r1i1p1/v20120101/tas/tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc' 'MD5' '7ad22ba02b1a0b3c23e0ad8b3d8a2e40'
'pr_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc' 'https://tds.ucar.edu/thredds/fileServer/pr/pr_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc' 'SHA256' 'deadbeef'
'tas_Amon_CCSM4_rcp45_r2i1p1_200601-210012.nc' 'http://tds.ucar.edu/tas_Amon_CCSM4_rcp45_r2i1p1_200601-210012.nc' 'md5'
EOF--dataset.file.url.chksum_type.chksum
)"
"#;

#[test]
fn script_entries_and_rejections() {
    let listing = parse_script(SCRIPT);
    assert!(!listing.no_matches);
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.rejected.len(), 2);

    let file = &listing.files[0];
    assert_eq!(file.filename, "tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc");
    assert!(file.location.starts_with("tds.ucar.edu/thredds/"));
    assert_eq!(file.checksum, "7ad22ba02b1a0b3c23e0ad8b3d8a2e40");
    assert_eq!(file.url(), format!("http://{}", file.location));
    assert!(listing.rejected[0].line.contains("SHA256"));
}

#[test]
fn no_matches_script_is_empty() {
    let listing = parse_script("No files were found that matched the query\n");
    assert!(listing.no_matches);
    assert!(listing.files.is_empty());
    assert!(listing.rejected.is_empty());
}

#[test]
fn query_url_lists_each_value() {
    let query = SearchQuery {
        experiment: "rcp45".to_string(),
        var_mips: BTreeSet::from([VarMip::new("tas", "Amon"), VarMip::new("pr", "Amon")]),
        models: BTreeSet::from(["CESM1-BGC".to_string()]),
        limit: 10_000,
    };
    let url = query.url(Node::Pcmdi).unwrap();
    assert_eq!(url.host_str(), Some("pcmdi9.llnl.gov"));
    assert_eq!(url.path(), "/esg-search/wget");

    let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
    let values = |key: &str| {
        pairs
            .iter()
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(values("experiment"), vec!["rcp45"]);
    assert_eq!(values("cmor_table"), vec!["Amon"]);
    assert_eq!(values("variable"), vec!["pr", "tas"]);
    assert_eq!(values("model"), vec!["CESM1(BGC)"]);
    assert_eq!(values("project"), vec!["CMIP5"]);
    assert_eq!(values("replica"), vec!["false"]);
    assert_eq!(values("latest"), vec!["true"]);
    assert_eq!(values("limit"), vec!["10000"]);
}
