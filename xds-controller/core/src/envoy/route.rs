use super::{DataSource, Extra, Validate};
use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, alias = "virtualHosts", skip_serializing_if = "Vec::is_empty")]
    pub virtual_hosts: Vec<VirtualHost>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualHost {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<RouteMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Value>,
    #[serde(
        default,
        alias = "directResponse",
        skip_serializing_if = "Option::is_none"
    )]
    pub direct_response: Option<DirectResponse>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, alias = "safeRegex", skip_serializing_if = "Option::is_none")]
    pub safe_regex: Option<Value>,
    #[serde(
        default,
        alias = "pathSeparatedPrefix",
        skip_serializing_if = "Option::is_none"
    )]
    pub path_separated_prefix: Option<String>,
    #[serde(
        default,
        alias = "pathMatchPolicy",
        skip_serializing_if = "Option::is_none"
    )]
    pub path_match_policy: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(
        default,
        alias = "weightedClusters",
        skip_serializing_if = "Option::is_none"
    )]
    pub weighted_clusters: Option<WeightedCluster>,
    #[serde(default, alias = "clusterHeader", skip_serializing_if = "Option::is_none")]
    pub cluster_header: Option<String>,
    #[serde(
        default,
        alias = "clusterSpecifierPlugin",
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_specifier_plugin: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedCluster {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterWeight>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterWeight {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectResponse {
    pub status: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<DataSource>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Where a route's cluster reference came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClusterRef<'r> {
    Direct(&'r str),
    Weighted(&'r str),
}

// === impl RouteConfiguration ===

impl Validate for RouteConfiguration {
    fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "route configuration name is empty");
        for vh in &self.virtual_hosts {
            vh.validate()?;
        }
        Ok(())
    }
}

// === impl VirtualHost ===

impl Validate for VirtualHost {
    fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "virtual host name is empty");
        ensure!(
            !self.domains.is_empty(),
            "virtual host {} has no domains",
            self.name
        );
        ensure!(
            !self.routes.is_empty(),
            "virtual host {} has no routes",
            self.name
        );
        for d in &self.domains {
            ensure!(!d.is_empty(), "virtual host {} has an empty domain", self.name);
        }
        for route in &self.routes {
            route.validate()?;
        }
        Ok(())
    }
}

// === impl Route ===

impl Route {
    /// Returns true for a route that matches every path: prefix `/` or exact path `/`.
    pub fn is_root(&self) -> bool {
        self.matcher.as_ref().is_some_and(|m| {
            m.prefix.as_deref() == Some("/") || m.path.as_deref() == Some("/")
        })
    }

    /// The clusters this route forwards to. Redirects and direct responses forward nowhere.
    pub fn clusters(&self) -> Vec<ClusterRef<'_>> {
        let Some(action) = &self.route else {
            return vec![];
        };
        let mut refs = vec![];
        if let Some(c) = action.cluster.as_deref().filter(|c| !c.is_empty()) {
            refs.push(ClusterRef::Direct(c));
        }
        if let Some(wc) = &action.weighted_clusters {
            refs.extend(
                wc.clusters
                    .iter()
                    .filter(|c| !c.name.is_empty())
                    .map(|c| ClusterRef::Weighted(&c.name)),
            );
        }
        refs
    }
}

impl Validate for Route {
    fn validate(&self) -> Result<()> {
        let Some(m) = &self.matcher else {
            bail!("route {:?} has no match", self.name);
        };
        ensure!(
            m.prefix.is_some()
                || m.path.is_some()
                || m.safe_regex.is_some()
                || m.path_separated_prefix.is_some()
                || m.path_match_policy.is_some(),
            "route {:?} has no path specifier",
            self.name
        );

        let actions = [
            self.route.is_some(),
            self.redirect.is_some(),
            self.direct_response.is_some(),
        ];
        match actions.iter().filter(|a| **a).count() {
            0 => bail!("route {:?} has no action", self.name),
            1 => {}
            _ => bail!("route {:?} has multiple actions", self.name),
        }

        if let Some(action) = &self.route {
            let has_cluster = action.cluster.as_deref().is_some_and(|c| !c.is_empty())
                || action.cluster_header.is_some()
                || action.cluster_specifier_plugin.is_some()
                || action
                    .weighted_clusters
                    .as_ref()
                    .is_some_and(|wc| !wc.clusters.is_empty());
            ensure!(has_cluster, "route {:?} has no cluster specifier", self.name);
        }
        if let Some(dr) = &self.direct_response {
            ensure!(
                (200..600).contains(&dr.status),
                "route {:?} has invalid direct response status {}",
                self.name,
                dr.status
            );
        }
        Ok(())
    }
}
