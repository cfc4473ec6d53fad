use leakscope::LeakContext;

fn main() {
    let context = LeakContext::new();
    let checking = context.mark_current_period();

    let leak = leakscope::tracked_new!(context, 10).expect("allocation failed");
    println!("{}", context.report(Some(checking)));

    unsafe { context.deallocate_scalar(leak.as_ptr()) };
    println!("{}", context.report(Some(checking)));
}
