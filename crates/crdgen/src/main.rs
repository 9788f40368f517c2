use kube::CustomResourceExt as _;
use ovsdb_cluster::api::v1alpha1::{ovsdbcluster::OvsdbCluster, ovsdbserver::OvsdbServer};

fn main() {
    print!("{}", serde_yaml::to_string(&OvsdbCluster::crd()).unwrap());
    println!("---");
    print!("{}", serde_yaml::to_string(&OvsdbServer::crd()).unwrap());
}
