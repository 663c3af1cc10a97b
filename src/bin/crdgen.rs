use kube::CustomResourceExt;

fn main() {
    let resources = [
        operand_operator::resources::OperandRequest::crd(),
        operand_operator::resources::OperandRegistry::crd(),
        operand_operator::resources::OperandConfig::crd(),
    ];

    for resource in resources {
        println!("---");
        print!("{}", serde_yaml::to_string(&resource).unwrap());
    }
}
