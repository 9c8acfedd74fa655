//! End-to-end broker scenarios: advertise/subscribe round trips, queued
//! topics, rate limiting, multi-instance priority, and publisher rules

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use skybus::{
        AdvertiseOptions, Broker, ManualClock, SkybusError, TopicDescriptor,
    };

    static IMU: TopicDescriptor = TopicDescriptor::new("imu", 16);
    static GPS: TopicDescriptor = TopicDescriptor::with_queue("gps", 8, 4);
    static RNG: TopicDescriptor = TopicDescriptor::new("rng", 4);
    static MAG: TopicDescriptor = TopicDescriptor::new("mag", 4);
    static BARO: TopicDescriptor = TopicDescriptor::new("baro", 8);
    static ATT: TopicDescriptor = TopicDescriptor::new("att", 8);
    static ODO: TopicDescriptor = TopicDescriptor::with_queue("odo", 8, 4);

    #[test]
    fn test_basic_round_trip() {
        let broker = Broker::new();

        let first: Vec<u8> = (0x00..0x10).collect();
        let publisher = broker
            .advertise(&IMU, &first, AdvertiseOptions::new())
            .unwrap();

        let subscriber = broker.subscribe(&IMU).unwrap();
        assert_eq!(subscriber.copy().unwrap(), first);
        assert!(!subscriber.check().unwrap());

        let second: Vec<u8> = (0x10..0x20).collect();
        publisher.publish(&second).unwrap();

        assert!(subscriber.check().unwrap());
        assert_eq!(subscriber.copy().unwrap(), second);
        assert!(!subscriber.check().unwrap());
    }

    #[test]
    fn test_queued_topic_slow_reader() {
        let broker = Broker::new();

        let payload = |tag: u8| [tag; 8];
        let publisher = broker
            .advertise(&GPS, &payload(b'A'), AdvertiseOptions::new())
            .unwrap();

        for tag in [b'B', b'C', b'D', b'E', b'F'] {
            publisher.publish(&payload(tag)).unwrap();
        }

        let subscriber = broker.subscribe(&GPS).unwrap();

        // six publishes into a depth-4 ring: the cursor is clamped to the
        // oldest still-held sample and two losses are counted
        assert_eq!(subscriber.copy().unwrap(), payload(b'C'));
        assert_eq!(subscriber.overflow_count(), 2);

        assert_eq!(subscriber.copy().unwrap(), payload(b'D'));
        assert_eq!(subscriber.copy().unwrap(), payload(b'E'));
        assert_eq!(subscriber.copy().unwrap(), payload(b'F'));
        assert!(!subscriber.check().unwrap());

        // caught up: further copies re-deliver the newest sample
        assert_eq!(subscriber.copy().unwrap(), payload(b'F'));
        assert_eq!(subscriber.overflow_count(), 2);
    }

    #[test]
    fn test_in_order_delivery_with_keeping_pace() {
        let broker = Broker::new();

        let publisher = broker
            .advertise(&ODO, &0u64.to_le_bytes(), AdvertiseOptions::new())
            .unwrap();
        let subscriber = broker.subscribe(&ODO).unwrap();

        assert_eq!(subscriber.copy().unwrap(), 0u64.to_le_bytes());

        for value in 1u64..=20 {
            publisher.publish(&value.to_le_bytes()).unwrap();

            assert!(subscriber.check().unwrap());
            assert_eq!(subscriber.copy().unwrap(), value.to_le_bytes());
        }

        assert_eq!(subscriber.overflow_count(), 0);
    }

    #[test]
    fn test_rate_limited_subscriber() {
        let clock = Arc::new(ManualClock::new());
        let broker = Broker::with_clock(clock.clone());

        let stamp = |t: u32| t.to_le_bytes();

        let publisher = broker
            .advertise(&RNG, &stamp(0), AdvertiseOptions::new())
            .unwrap();
        let subscriber = broker.subscribe(&RNG).unwrap();
        subscriber.set_interval_us(10_000).unwrap();

        clock.set(2_000);
        publisher.publish(&stamp(2_000)).unwrap();

        clock.set(3_000);
        assert!(!subscriber.check().unwrap());

        clock.set(5_000);
        publisher.publish(&stamp(5_000)).unwrap();

        clock.set(12_000);
        publisher.publish(&stamp(12_000)).unwrap();

        clock.set(12_500);
        assert!(subscriber.check().unwrap());
        assert_eq!(subscriber.copy().unwrap(), stamp(12_000));

        clock.set(14_000);
        publisher.publish(&stamp(14_000)).unwrap();

        // window runs from the copy at 12_500; next update at 22_500
        clock.set(15_000);
        assert!(!subscriber.check().unwrap());

        clock.set(22_500);
        assert!(subscriber.check().unwrap());
    }

    #[test]
    fn test_interval_millisecond_surface() {
        let broker = Broker::new();
        broker
            .advertise(&RNG, &[0u8; 4], AdvertiseOptions::new())
            .unwrap();

        let subscriber = broker.subscribe(&RNG).unwrap();
        subscriber.set_interval_ms(25).unwrap();
        assert_eq!(subscriber.get_interval_us(), 25_000);
        assert_eq!(subscriber.get_interval_ms(), 25);
    }

    #[test]
    fn test_multi_instance_priority_selection() {
        let broker = Broker::new();

        for (instance, priority) in [(0usize, 1i8), (1, 3), (2, 3)] {
            broker
                .advertise(
                    &MAG,
                    &[instance as u8; 4],
                    AdvertiseOptions::new()
                        .with_instance(instance)
                        .with_priority(priority),
                )
                .unwrap();
        }

        // highest priority wins; the tie between 1 and 2 goes to 1
        assert_eq!(broker.resolve_best_instance(&MAG), Some(1));

        let best = broker.subscribe_best(&MAG).unwrap();
        assert_eq!(best.instance(), 1);
        assert_eq!(best.copy().unwrap(), [1u8; 4]);
    }

    #[test]
    fn test_latent_subscription_sees_later_advertise() {
        let broker = Broker::new();

        let subscriber = broker.subscribe(&BARO).unwrap();
        assert!(!broker.exists(&BARO, 0));
        assert!(!subscriber.check().unwrap());
        assert!(matches!(
            subscriber.copy().unwrap_err(),
            SkybusError::NoData { .. }
        ));

        let payload = [0x42u8; 8];
        let _publisher = broker
            .advertise(&BARO, &payload, AdvertiseOptions::new())
            .unwrap();

        assert!(broker.exists(&BARO, 0));
        assert!(subscriber.check().unwrap());
        assert_eq!(subscriber.copy().unwrap(), payload);
    }

    #[test]
    fn test_publisher_rules_deny_from_file() {
        let mut rules_file = tempfile::NamedTempFile::new().unwrap();
        rules_file
            .write_all(b"module: estimator\nrestrict_topics: att\nignore_others: true\n")
            .unwrap();

        let mut broker = Broker::new();
        broker.load_publisher_rules(rules_file.path()).unwrap();

        let subscriber = broker.subscribe(&ATT).unwrap();

        let publisher = broker
            .advertise(
                &ATT,
                &[1u8; 8],
                AdvertiseOptions::new().from_module("mavlink"),
            )
            .unwrap();

        // the sentinel accepts publishes but nothing ever lands
        publisher.publish(&[2u8; 8]).unwrap();
        assert!(!subscriber.check().unwrap());
        assert!(matches!(
            subscriber.copy().unwrap_err(),
            SkybusError::NoData { .. }
        ));
    }

    #[test]
    fn test_malformed_rules_leave_broker_usable() {
        let mut rules_file = tempfile::NamedTempFile::new().unwrap();
        rules_file.write_all(b"module only, no topics\n").unwrap();

        let mut broker = Broker::new();
        assert!(broker.load_publisher_rules(rules_file.path()).is_err());

        // no rules installed: everything may publish
        let publisher = broker
            .advertise(
                &ATT,
                &[1u8; 8],
                AdvertiseOptions::new().from_module("mavlink"),
            )
            .unwrap();
        let subscriber = broker.subscribe(&ATT).unwrap();
        publisher.publish(&[2u8; 8]).unwrap();
        assert_eq!(subscriber.copy().unwrap(), [2u8; 8]);
    }

    #[test]
    fn test_stat_reports_publication_time() {
        let clock = Arc::new(ManualClock::new());
        let broker = Broker::with_clock(clock.clone());

        let subscriber = broker.subscribe(&RNG).unwrap();
        assert_eq!(subscriber.stat(), 0);

        clock.set(4_200);
        let publisher = broker
            .advertise(&RNG, &[0u8; 4], AdvertiseOptions::new())
            .unwrap();
        assert_eq!(subscriber.stat(), 4_200);

        clock.set(9_000);
        publisher.publish(&[1u8; 4]).unwrap();
        assert_eq!(subscriber.stat(), 9_000);
    }

    #[test]
    fn test_queue_growth_rejected_but_node_usable() {
        let broker = Broker::new();

        let publisher = broker
            .advertise(&GPS, &[0u8; 8], AdvertiseOptions::new().with_queue_size(4))
            .unwrap();

        let err = broker
            .advertise(&GPS, &[0u8; 8], AdvertiseOptions::new().with_instance(0).with_queue_size(8))
            .unwrap_err();
        assert!(matches!(err, SkybusError::QueueTooLarge { .. }));

        // the original publisher and its queue still work
        publisher.publish(&[1u8; 8]).unwrap();
        let subscriber = broker.subscribe(&GPS).unwrap();
        assert_eq!(subscriber.copy().unwrap(), [0u8; 8]);
        assert_eq!(subscriber.copy().unwrap(), [1u8; 8]);
    }

    #[test]
    fn test_unadvertise_leaves_last_value_readable() {
        let broker = Broker::new();

        let publisher = broker
            .advertise(&IMU, &[7u8; 16], AdvertiseOptions::new())
            .unwrap();
        broker.unadvertise(publisher);

        // quiescent, but the ring still answers
        assert!(broker.exists(&IMU, 0));
        let subscriber = broker.subscribe(&IMU).unwrap();
        assert_eq!(subscriber.copy().unwrap(), [7u8; 16]);
    }
}
